/*
    Transducer over-temperature monitoring. The monitor does not own a timer;
    the delivery control loop calls check() on its own polling tick so there
    is exactly one polling loop in the system. A fault reading is the one
    signal allowed to terminate a session from any mode.
 */
use std::fmt;
use std::sync::{Arc,Mutex};
use log::debug;

#[derive(Debug)]
pub enum ProbeError {
    ReadFailed(String),
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeError::ReadFailed(msg) => write!(f,"temperature probe read failed: {}",msg),
        }
    }
}

impl std::error::Error for ProbeError {}

pub trait TempProbe {
    /// transducer temperature in degrees C
    fn sample(&mut self) -> Result<f32,ProbeError>;
}

#[derive(Debug,Clone,Copy,PartialEq)]
pub enum TempStatus {
    Ok,
    Warn,
    Fault,
}

pub fn classify(t:f32,warn_limit:f32,error_limit:f32) -> TempStatus {
    if t > error_limit {
        TempStatus::Fault
    }
    else if t > warn_limit {
        TempStatus::Warn
    }
    else {
        TempStatus::Ok
    }
}

/// what the control loop must do about the latest reading
#[derive(Debug,Clone,PartialEq)]
pub enum TempAction {
    None(f32),
    /// first warn-level reading since the throttle was last armed
    Warn(f32),
    Fault(f32),
}

/// reset rule for repeated warn-level readings. The source behavior only
/// pins down "warn once, then stop flooding"; the re-arm condition is policy.
#[derive(Debug,Clone,Copy,PartialEq)]
pub enum WarnThrottle {
    /// re-arm the warning once the reading drops back below the warn limit
    ResetBelowWarn,
    OncePerSession,
}

pub struct TempMonitor {
    probe:Box<dyn TempProbe>,
    pub warn_limit:f32,
    pub error_limit:f32,
    pub throttle:WarnThrottle,
    been_warned:bool,
}

impl TempMonitor {

    pub fn new(probe:Box<dyn TempProbe>,warn_limit:f32,error_limit:f32) -> Self {
        Self {
            probe,
            warn_limit,
            error_limit,
            throttle: WarnThrottle::ResetBelowWarn,
            been_warned: false,
        }
    }

    pub fn been_warned(&self) -> bool {
        self.been_warned
    }

    /// sample the probe once and classify. Called from the control loop's
    /// polling tick. A probe read failure is treated as a fault: an unreadable
    /// transducer temperature is not a safe condition to keep transmitting in.
    pub fn check(&mut self) -> TempAction {
        let t = match self.probe.sample() {
            Ok(t) => t,
            Err(e) => {
                debug!("probe failure treated as over-temperature fault: {}",e);
                return TempAction::Fault(f32::NAN)
            }
        };
        match classify(t,self.warn_limit,self.error_limit) {
            TempStatus::Fault => TempAction::Fault(t),
            TempStatus::Warn => {
                match self.been_warned {
                    true => {
                        debug!("transducer still above warn limit: {:.2} C",t);
                        TempAction::None(t)
                    }
                    false => {
                        self.been_warned = true;
                        TempAction::Warn(t)
                    }
                }
            }
            TempStatus::Ok => {
                if self.been_warned && self.throttle == WarnThrottle::ResetBelowWarn {
                    self.been_warned = false;
                }
                TempAction::None(t)
            }
        }
    }
}

/// settable probe for simulation and tests. The setpoint is shared so a test
/// (or fault-injection harness) can move the temperature while a session runs.
#[derive(Clone)]
pub struct SimProbe {
    setpoint:Arc<Mutex<f32>>,
    jitter:f32,
}

impl SimProbe {

    pub fn new(initial:f32) -> Self {
        Self {
            setpoint: Arc::new(Mutex::new(initial)),
            jitter: 0.0,
        }
    }

    pub fn with_jitter(initial:f32,jitter:f32) -> Self {
        Self {
            setpoint: Arc::new(Mutex::new(initial)),
            jitter,
        }
    }

    pub fn set(&self,t:f32) {
        *self.setpoint.lock().unwrap() = t;
    }
}

impl TempProbe for SimProbe {
    fn sample(&mut self) -> Result<f32,ProbeError> {
        let t = *self.setpoint.lock().unwrap();
        match self.jitter > 0.0 {
            true => Ok(t + self.jitter*(rand::random::<f32>() - 0.5)),
            false => Ok(t)
        }
    }
}
