use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

pub fn read_to_string(filepath:&Path) -> std::io::Result<String> {
    let mut f = File::open(filepath)?;
    let mut s = String::new();
    f.read_to_string(&mut s)?;
    Ok(s)
}

pub fn write_to_file(filepath:&Path,string:&str) -> std::io::Result<()> {
    let mut f = File::create(filepath)?;
    f.write_all(string.as_bytes())
}

pub fn trim_newline(s: &mut String) {
    if s.ends_with('\n') {
        s.pop();
        if s.ends_with('\r') {
            s.pop();
        }
    }
}

/// format a duration in seconds as h:mm:ss for operator-facing messages
pub fn format_hms(seconds:f32) -> String {
    let total = seconds.max(0.0).round() as u64;
    let h = total/3600;
    let m = (total%3600)/60;
    let s = total%60;
    format!("{}:{:02}:{:02}",h,m,s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hms_formatting() {
        assert_eq!(format_hms(0.0),"0:00:00");
        assert_eq!(format_hms(61.0),"0:01:01");
        assert_eq!(format_hms(3725.4),"1:02:05");
    }

    #[test]
    fn newline_trimming() {
        let mut s = String::from("12345\r\n");
        trim_newline(&mut s);
        assert_eq!(s,"12345");
        let mut s = String::from("12345");
        trim_newline(&mut s);
        assert_eq!(s,"12345");
    }
}
