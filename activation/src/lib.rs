/*
    Activation is the act of one controller process claiming logical ownership
    of the transducer hardware before issuing commands to it. The token is a
    plain text file at a well-known location holding the owner's identity;
    absence means no owner and the last writer wins. This is a best-effort
    advisory lock, not a strict mutex: there is no compare-and-swap and the
    liveness check can race a process exiting. Callers depend on the stale
    token of a dead process being treated as abandoned after a crash.
 */
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use regex::Regex;
use log::{info,warn};

const TOKEN_DIR:&str = "/var/tmp/fus_scan";
//const TOKEN_DIR:&str = r"C:\workstation\fus_scan";
pub const TOKEN_FILENAME:&str = "activation_token";

/// executable name the liveness check looks for in the host process table
pub const PROCESS_SIGNATURE:&str = "treat_control";

#[derive(Debug)]
pub enum ActivationError {
    ProcessTableUnavailable(String),
}

impl fmt::Display for ActivationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActivationError::ProcessTableUnavailable(msg) =>
                write!(f,"cannot query host process table: {}",msg),
        }
    }
}

impl std::error::Error for ActivationError {}

#[derive(Debug,Clone,PartialEq)]
pub enum Ownership {
    Granted,
    /// another live controller instance holds the token
    Conflict(String),
}

pub trait ProcessQuery {
    /// is there a live controller process matching the stored identity?
    fn is_alive(&self,token_id:&str) -> Result<bool,ActivationError>;
}

/// identity written into the token: `<pid>:<user>`
pub fn this_process_id() -> String {
    format!("{}:{}",std::process::id(),whoami::username())
}

fn pid_of(token_id:&str) -> Option<&str> {
    let pid = token_id.split(':').next().unwrap_or("");
    match pid.is_empty() || !pid.bytes().all(|b|b.is_ascii_digit()) {
        true => None,
        false => Some(pid)
    }
}

/// liveness check against the real host process table
pub struct HostProcessTable;

impl ProcessQuery for HostProcessTable {
    fn is_alive(&self,token_id:&str) -> Result<bool,ActivationError> {
        let pid = match pid_of(token_id) {
            Some(pid) => pid,
            // a malformed token can never name a live process
            None => return Ok(false)
        };
        let listing = process_listing()?;
        let reg = Regex::new(r"(?m)^\s*(\d+)\s+(\S+)").unwrap();
        for caps in reg.captures_iter(&listing) {
            let entry_pid = caps.get(1).map_or("",|m|m.as_str());
            let entry_name = caps.get(2).map_or("",|m|m.as_str());
            if entry_pid == pid && entry_name.contains(PROCESS_SIGNATURE) {
                return Ok(true)
            }
        }
        Ok(false)
    }
}

#[cfg(not(windows))]
fn process_listing() -> Result<String,ActivationError> {
    let out = Command::new("ps").args(["-e","-o","pid=,comm="]).output()
        .map_err(|e|ActivationError::ProcessTableUnavailable(e.to_string()))?;
    String::from_utf8(out.stdout)
        .map_err(|e|ActivationError::ProcessTableUnavailable(e.to_string()))
}

#[cfg(windows)]
fn process_listing() -> Result<String,ActivationError> {
    // tasklist prints name first; reorder to "pid name" lines for the parser
    let out = Command::new("tasklist").args(["/fo","csv","/nh"]).output()
        .map_err(|e|ActivationError::ProcessTableUnavailable(e.to_string()))?;
    let raw = String::from_utf8(out.stdout)
        .map_err(|e|ActivationError::ProcessTableUnavailable(e.to_string()))?;
    let reg = Regex::new(r#""([^"]+)","(\d+)""#).unwrap();
    let lines:Vec<String> = reg.captures_iter(&raw).map(|caps|{
        format!("{} {}",&caps[2],&caps[1])
    }).collect();
    Ok(lines.join("\n"))
}

pub struct ActivationLock {
    token_file:PathBuf,
    table:Box<dyn ProcessQuery>,
}

impl ActivationLock {

    pub fn new(token_file:&Path,table:Box<dyn ProcessQuery>) -> Self {
        Self {
            token_file: token_file.to_owned(),
            table,
        }
    }

    /// lock over the well-known token location, checked against the real process table
    pub fn default_location() -> Self {
        Self::new(&Path::new(TOKEN_DIR).join(TOKEN_FILENAME),Box::new(HostProcessTable))
    }

    /// identity currently persisted in the token file, if any
    pub fn current_holder(&self) -> Option<String> {
        let mut s = utils::read_to_string(&self.token_file).ok()?;
        utils::trim_newline(&mut s);
        match s.is_empty() {
            true => None,
            false => Some(s)
        }
    }

    pub fn acquire(&self,this_id:&str) -> Result<Ownership,ActivationError> {
        match self.current_holder() {
            None => {
                info!("no activation token present; claiming hardware for {}",this_id);
                self.grant(this_id)
            }
            Some(holder) if holder == this_id => {
                // idempotent re-acquire, e.g. restart with a resumed identity
                self.grant(this_id)
            }
            Some(holder) => {
                match self.table.is_alive(&holder)? {
                    true => Ok(Ownership::Conflict(holder)),
                    false => {
                        warn!("activation token holder {} is not running; treating token as abandoned",holder);
                        self.grant(this_id)
                    }
                }
            }
        }
    }

    /// remove the token, but only if we are the recorded holder
    pub fn release(&self,this_id:&str) {
        match self.current_holder() {
            Some(holder) if holder == this_id => {
                if let Err(e) = std::fs::remove_file(&self.token_file) {
                    warn!("could not remove activation token: {}",e);
                }
            }
            Some(holder) => warn!("not releasing activation token held by {}",holder),
            None => {}
        }
    }

    /// operator-driven cleanup: remove the token if its holder is gone.
    /// Refuses (returns false) while the holder is a live controller process.
    pub fn release_stale(&self) -> Result<bool,ActivationError> {
        match self.current_holder() {
            None => Ok(true),
            Some(holder) => {
                match self.table.is_alive(&holder)? {
                    true => Ok(false),
                    false => {
                        if let Err(e) = std::fs::remove_file(&self.token_file) {
                            warn!("could not remove activation token: {}",e);
                        }
                        Ok(true)
                    }
                }
            }
        }
    }

    fn grant(&self,this_id:&str) -> Result<Ownership,ActivationError> {
        if let Some(dir) = self.token_file.parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        // acquisition already succeeded logically; a failed write only weakens
        // the advisory protection for other instances
        if let Err(e) = utils::write_to_file(&self.token_file,this_id) {
            warn!("could not persist activation token ({}); continuing unprotected",e);
        }
        Ok(Ownership::Granted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeTable {
        alive:bool,
    }

    impl ProcessQuery for FakeTable {
        fn is_alive(&self,_token_id:&str) -> Result<bool,ActivationError> {
            Ok(self.alive)
        }
    }

    fn scratch_token(tag:&str) -> PathBuf {
        std::env::temp_dir().join(format!("activation_test_{}_{}",tag,std::process::id()))
    }

    fn lock(tag:&str,alive:bool) -> ActivationLock {
        let path = scratch_token(tag);
        let _ = std::fs::remove_file(&path);
        ActivationLock::new(&path,Box::new(FakeTable{alive}))
    }

    #[test]
    fn absent_token_grants_and_persists() {
        let lock = lock("absent",true);
        assert_eq!(lock.acquire("100:op").unwrap(),Ownership::Granted);
        assert_eq!(lock.current_holder().unwrap(),"100:op");
        lock.release("100:op");
        assert!(lock.current_holder().is_none());
    }

    #[test]
    fn own_token_reacquires() {
        let lock = lock("own",true);
        lock.acquire("100:op").unwrap();
        assert_eq!(lock.acquire("100:op").unwrap(),Ownership::Granted);
        lock.release("100:op");
    }

    #[test]
    fn live_holder_conflicts() {
        let lock = lock("live",true);
        lock.acquire("100:op").unwrap();
        match lock.acquire("200:other").unwrap() {
            Ownership::Conflict(holder) => assert_eq!(holder,"100:op"),
            other => panic!("expected conflict, got {:?}",other),
        }
        // conflict must not overwrite the token
        assert_eq!(lock.current_holder().unwrap(),"100:op");
        lock.release("100:op");
    }

    #[test]
    fn dead_holder_is_abandoned() {
        let lock = lock("dead",false);
        lock.acquire("100:op").unwrap();
        assert_eq!(lock.acquire("200:other").unwrap(),Ownership::Granted);
        assert_eq!(lock.current_holder().unwrap(),"200:other");
        lock.release("200:other");
    }

    #[test]
    fn release_refuses_foreign_token() {
        let lock = lock("foreign",true);
        lock.acquire("100:op").unwrap();
        lock.release("200:other");
        assert_eq!(lock.current_holder().unwrap(),"100:op");
        lock.release("100:op");
    }

    #[test]
    fn stale_release_respects_liveness() {
        let lock = lock("stale",true);
        lock.acquire("100:op").unwrap();
        assert!(!lock.release_stale().unwrap());
        assert_eq!(lock.current_holder().unwrap(),"100:op");
        let dead = ActivationLock::new(&scratch_token("stale"),Box::new(FakeTable{alive:false}));
        assert!(dead.release_stale().unwrap());
        assert!(dead.current_holder().is_none());
    }

    #[test]
    fn malformed_token_never_matches_a_process() {
        assert!(pid_of("not-a-pid").is_none());
        assert!(pid_of("").is_none());
        assert_eq!(pid_of("4812:wyatt"),Some("4812"));
    }
}
