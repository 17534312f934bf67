/*
    Hardware event sequencer boundary. The sequencer owns hardware-level
    timing for one burst; the control loop only starts it and learns about
    per-event completion through the on_pulse callback, which can abort the
    train between events. Backends are interchangeable behind one run
    contract.
 */
use std::fmt;
use std::process::Command;
use std::thread;
use std::time::Duration;
use regex::Regex;
use log::debug;

const DIR:&str = "/opt/fus_scan/vendor";
//const DIR:&str = r"C:\workstation\fus_scan\vendor";
const FIRE_CMD:&str = "fire_train";
const STATUS_CMD:&str = "train_status";
const ABORT_CMD:&str = "abort_train";

#[derive(Debug)]
pub enum SequencerError {
    LaunchFailed(String),
    /// the vendor runner reported a hardware-level failure
    HardwareFault(String),
}

impl fmt::Display for SequencerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SequencerError::LaunchFailed(msg) => write!(f,"could not launch event sequencer: {}",msg),
            SequencerError::HardwareFault(msg) => write!(f,"event sequencer fault: {}",msg),
        }
    }
}

impl std::error::Error for SequencerError {}

#[derive(Debug,Clone,Copy,PartialEq)]
pub enum PulseControl {
    Continue,
    Abort,
}

/// one burst as handed to the sequencer. first_pulse > 1 resumes a burst that
/// a freeze interrupted part-way through.
#[derive(Debug,Clone)]
pub struct BurstSpec {
    pub burst_index:u32,
    pub first_pulse:u32,
    pub pulse_count:u32,
    pub pulse_interval:f32,
    pub num_foci:u32,
}

impl BurstSpec {
    pub fn pulses_remaining(&self) -> u32 {
        self.pulse_count.saturating_sub(self.first_pulse.saturating_sub(1))
    }
}

pub trait EventSequencer {
    /// fire the burst's pulse train, invoking on_pulse after every
    /// hardware-confirmed event. Returning Abort from the callback must stop
    /// the train before the next event fires.
    fn run_burst(&mut self,burst:&BurstSpec,on_pulse:&mut dyn FnMut() -> PulseControl)
        -> Result<(),SequencerError>;
}

#[derive(Debug,Clone,Copy,PartialEq)]
pub enum SystemVariant {
    Sim,
    Vendor,
}

impl SystemVariant {
    pub fn list() -> String {
        vec![
            Self::decode(&Self::Sim),
            Self::decode(&Self::Vendor),
        ].join("\n")
    }
    pub fn encode(name:&str) -> Option<Self> {
        match name {
            "sim" => Some(Self::Sim),
            "vendor" => Some(Self::Vendor),
            _=> None
        }
    }
    pub fn decode(&self) -> String {
        match &self {
            Self::Sim => String::from("sim"),
            Self::Vendor => String::from("vendor"),
        }
    }
    pub fn sequencer(&self) -> Box<dyn EventSequencer> {
        match &self {
            Self::Sim => Box::new(SimSequencer),
            Self::Vendor => Box::new(VendorSequencer),
        }
    }
}

/// software-timed sequencer for dry runs and tests: one sleep per pulse at
/// the requested interval, no hardware behind it
pub struct SimSequencer;

impl EventSequencer for SimSequencer {
    fn run_burst(&mut self,burst:&BurstSpec,on_pulse:&mut dyn FnMut() -> PulseControl)
        -> Result<(),SequencerError> {
        let interval = Duration::from_secs_f32(burst.pulse_interval);
        for pulse in burst.first_pulse..=burst.pulse_count {
            thread::sleep(interval);
            debug!("sim pulse {} of burst {} fired",pulse,burst.burst_index);
            if on_pulse() == PulseControl::Abort {
                return Ok(())
            }
        }
        Ok(())
    }
}

/// drives the vendor pulse-train runner. fire_train is non-blocking, so
/// completion is polled through train_status and newly fired events are
/// reported back one at a time.
pub struct VendorSequencer;

impl VendorSequencer {
    fn status() -> Result<u32,SequencerError> {
        let out = Command::new(STATUS_CMD)
            .current_dir(DIR)
            .output()
            .map_err(|e|SequencerError::LaunchFailed(e.to_string()))?;
        let stdout = String::from_utf8(out.stdout)
            .map_err(|e|SequencerError::HardwareFault(e.to_string()))?;
        let reg = Regex::new(r"events_fired:([0-9]+)").unwrap();
        let fault_reg = Regex::new(r"fault:(.+)").unwrap();
        if let Some(caps) = fault_reg.captures(&stdout) {
            return Err(SequencerError::HardwareFault(caps[1].trim().to_string()))
        }
        match reg.captures(&stdout) {
            Some(caps) => caps[1].parse()
                .map_err(|_|SequencerError::HardwareFault("unreadable event count".to_string())),
            None => Err(SequencerError::HardwareFault("status not found!".to_string())),
        }
    }

    fn abort() {
        // best effort; the train also stops on its own at the end of the burst
        let _ = Command::new(ABORT_CMD).current_dir(DIR).output();
    }
}

impl EventSequencer for VendorSequencer {
    fn run_burst(&mut self,burst:&BurstSpec,on_pulse:&mut dyn FnMut() -> PulseControl)
        -> Result<(),SequencerError> {
        let remaining = burst.pulses_remaining();
        Command::new(FIRE_CMD)
            .current_dir(DIR)
            .args([
                "--pulses",&remaining.to_string(),
                "--interval",&burst.pulse_interval.to_string(),
                "--foci",&burst.num_foci.to_string(),
            ])
            .output()
            .map_err(|e|SequencerError::LaunchFailed(e.to_string()))?;
        let poll = Duration::from_secs_f32((burst.pulse_interval/4.0).max(0.001));
        let mut reported = 0;
        while reported < remaining {
            thread::sleep(poll);
            let fired = Self::status()?.min(remaining);
            while reported < fired {
                reported += 1;
                if on_pulse() == PulseControl::Abort {
                    Self::abort();
                    return Ok(())
                }
            }
        }
        Ok(())
    }
}
