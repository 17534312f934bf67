use std::process::Command;
use regex::Regex;
use thermometry::{ProbeError, TempProbe};

const PROBE_CMD:&str = "probe_temp";
const DIR:&str = "/opt/fus_scan/vendor";
//const DIR:&str = r"C:\workstation\fus_scan\vendor";

/// transducer thermocouple behind the vendor probe utility
pub struct VendorProbe;

impl TempProbe for VendorProbe {
    fn sample(&mut self) -> Result<f32,ProbeError> {
        let out = Command::new(PROBE_CMD)
            .current_dir(DIR)
            .output()
            .map_err(|e|ProbeError::ReadFailed(e.to_string()))?;
        let stdout = String::from_utf8(out.stdout)
            .map_err(|e|ProbeError::ReadFailed(e.to_string()))?;
        let reg = Regex::new(r"temp_c:(-?[0-9]+\.?[0-9]*)").unwrap();
        match reg.captures(&stdout) {
            Some(caps) => caps[1].parse()
                .map_err(|_|ProbeError::ReadFailed("unreadable temperature".to_string())),
            None => Err(ProbeError::ReadFailed("temperature not found!".to_string())),
        }
    }
}
