use std::fmt;
use std::path::Path;
use std::time::Duration;
use serde::{Serialize,Deserialize};

#[derive(Debug)]
pub enum ParamsError {
    CannotOpen,
    InvalidFormat,
    /// burst_interval shorter than pulse_count*pulse_interval
    BurstIntervalTooShort{burst_interval:f32,minimum:f32},
    NonPositiveField(&'static str),
}

impl fmt::Display for ParamsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamsError::CannotOpen => write!(f,"cannot open parameter file"),
            ParamsError::InvalidFormat => write!(f,"parameter file is not valid json for this sequence"),
            ParamsError::BurstIntervalTooShort{burst_interval,minimum} =>
                write!(f,"burst interval {} s is shorter than the pulse train itself ({} s)",burst_interval,minimum),
            ParamsError::NonPositiveField(name) => write!(f,"{} must be greater than 0",name),
        }
    }
}

impl std::error::Error for ParamsError {}

/// immutable description of one treatment delivery. `burst_interval` is the
/// time between burst starts, so it must cover the pulse train; a value of 0
/// in the file means "no cooldown" and is derived as pulse_count*pulse_interval.
#[derive(Serialize,Deserialize,Clone,Debug)]
pub struct TreatParams {
    pub name:String,
    /// pulses per burst, distributed round-robin over the foci
    pub pulse_count:u32,
    /// seconds between pulse starts within a burst
    pub pulse_interval:f32,
    pub burst_count:u32,
    /// seconds between burst starts (0 derives pulse_count*pulse_interval)
    pub burst_interval:f32,
    pub num_foci:u32,
    pub description:String,
}

impl TreatParams {

    pub fn default() -> Self {
        TreatParams {
            name: "pulse_train".to_string(),
            pulse_count: 4,
            pulse_interval: 1.0,
            burst_count: 3,
            burst_interval: 10.0,
            num_foci: 1,
            description: "4 pulses per burst at 1 s spacing, 3 bursts on a 10 s period".to_string(),
        }
    }

    pub fn load(params_file:&Path) -> Result<Self,ParamsError> {
        let json_str = utils::read_to_string(params_file).map_err(|_|ParamsError::CannotOpen)?;
        let params:TreatParams = serde_json::from_str(&json_str).map_err(|_|ParamsError::InvalidFormat)?;
        params.validated()
    }

    pub fn write_default(params_file:&Path) {
        let params = Self::default();
        let str = serde_json::to_string_pretty(&params).expect("cannot serialize struct");
        utils::write_to_file(params_file,&str).expect("trouble writing to file");
    }

    /// enforce the burst-interval invariant before anything downstream sees
    /// the parameters. Nothing is constructed on failure.
    pub fn validated(mut self) -> Result<Self,ParamsError> {
        if self.pulse_count == 0 {
            return Err(ParamsError::NonPositiveField("pulse_count"))
        }
        if self.burst_count == 0 {
            return Err(ParamsError::NonPositiveField("burst_count"))
        }
        if self.num_foci == 0 {
            return Err(ParamsError::NonPositiveField("num_foci"))
        }
        if self.pulse_interval <= 0.0 {
            return Err(ParamsError::NonPositiveField("pulse_interval"))
        }
        let train = self.pulse_count as f32 * self.pulse_interval;
        if self.burst_interval == 0.0 {
            self.burst_interval = train;
        }
        if self.burst_interval < train {
            return Err(ParamsError::BurstIntervalTooShort {
                burst_interval: self.burst_interval,
                minimum: train,
            })
        }
        Ok(self)
    }

    /// time spent actually transmitting within one burst period
    pub fn burst_duration(&self) -> f32 {
        self.pulse_count as f32 * self.pulse_interval
    }

    /// mandatory wait between the last pulse of a burst and the next burst start
    pub fn cooldown_duration(&self) -> f32 {
        self.burst_interval - self.burst_duration()
    }

    /// nominal wall-clock length of an uninterrupted session
    pub fn total_nominal_duration(&self) -> f32 {
        (self.burst_count.saturating_sub(1)) as f32 * self.burst_interval + self.burst_duration()
    }

    pub fn burst_interval_duration(&self) -> Duration {
        Duration::from_secs_f32(self.burst_interval)
    }

    /// round-robin focus assignment for a 1-based pulse index
    pub fn focus_for_pulse(&self,pulse_index:u32) -> u32 {
        pulse_index.saturating_sub(1) % self.num_foci
    }
}
