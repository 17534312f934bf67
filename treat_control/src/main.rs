use std::io::BufRead;
use std::thread;
use clap::Parser;
use log::warn;
use activation::{ActivationLock, Ownership};
use thermometry::{SimProbe, TempMonitor, TempProbe};
use treat_params::TreatParams;
use treat_control::args::*;
use treat_control::flags::{ConsoleDisplay, OperatorFlags};
use treat_control::probe::VendorProbe;
use treat_control::sequencer::SystemVariant;
use treat_control::session::{Session, SessionStatus};

const DEFAULT_WARN_LIMIT:f32 = 42.0;
const DEFAULT_ERROR_LIMIT:f32 = 47.0;

fn main() {
    env_logger::init();
    let args = TreatControlArgs::parse();

    match args.action {
        Action::NewParams(path_args) => {
            TreatParams::write_default(&path_args.path);
            println!("wrote default parameters to {:?}",path_args.path);
        }
        Action::Validate(path_args) => {
            match TreatParams::load(&path_args.path) {
                Ok(p) => println!("ok: {} ({} bursts, {} s nominal)",p.name,p.burst_count,p.total_nominal_duration()),
                Err(e) => {
                    println!("invalid parameters: {}",e);
                    std::process::exit(1);
                }
            }
        }
        Action::Status => {
            let lock = ActivationLock::default_location();
            match lock.current_holder() {
                Some(holder) => println!("hardware is activated by {}",holder),
                None => println!("no active owner"),
            }
        }
        Action::Release => {
            let lock = ActivationLock::default_location();
            match lock.release_stale() {
                Ok(true) => println!("activation token released"),
                Ok(false) => println!("token holder is still running; not releasing. Abort that session first."),
                Err(e) => {
                    println!("{}",e);
                    std::process::exit(1);
                }
            }
        }
        Action::Run(run_args) => {
            run_session(run_args);
        }
    }
}

fn run_session(args:RunArgs) {
    // configuration errors are fatal before any hardware is touched
    let params = match TreatParams::load(&args.path) {
        Ok(p) => p,
        Err(e) => {
            println!("invalid parameters: {}",e);
            std::process::exit(1);
        }
    };

    let system = match &args.system {
        Some(name) => {
            match SystemVariant::encode(name) {
                Some(s) => s,
                None => {
                    println!("unknown system '{}'. Available systems:\n{}",name,SystemVariant::list());
                    std::process::exit(1);
                }
            }
        }
        None => SystemVariant::Sim,
    };

    let this_id = activation::this_process_id();
    let lock = ActivationLock::default_location();
    if !acquire_or_abort(&lock,&this_id) {
        println!("aborted. No hardware was touched.");
        return
    }

    let probe:Box<dyn TempProbe> = match system {
        SystemVariant::Sim => Box::new(SimProbe::with_jitter(37.0,0.5)),
        SystemVariant::Vendor => Box::new(VendorProbe),
    };
    let monitor = TempMonitor::new(
        probe,
        args.warn_limit.unwrap_or(DEFAULT_WARN_LIMIT),
        args.error_limit.unwrap_or(DEFAULT_ERROR_LIMIT),
    );

    let flags = OperatorFlags::new();
    if args.auto_start {
        flags.request_start();
    }
    spawn_operator_console(flags.clone());

    let mut session = Session::new(
        params,
        monitor,
        system.sequencer(),
        flags,
        Box::new(ConsoleDisplay::new()),
    );
    let result = session.run();
    lock.release(&this_id);

    println!("{}",result.summary);
    if result.status == SessionStatus::Error {
        std::process::exit(1);
    }
}

/// blocking retry/abort choice on an activation conflict. Bounded only by
/// operator action; ownership is never silently stolen from a live session.
fn acquire_or_abort(lock:&ActivationLock,this_id:&str) -> bool {
    loop {
        match lock.acquire(this_id) {
            Ok(Ownership::Granted) => return true,
            Ok(Ownership::Conflict(holder)) => {
                println!("hardware is already activated by another controller ({}).",holder);
                println!("retry after closing that session, or abort? [r/a]");
                let mut line = String::new();
                if std::io::stdin().lock().read_line(&mut line).is_err() {
                    return false
                }
                utils::trim_newline(&mut line);
                if line.trim().eq_ignore_ascii_case("a") {
                    return false
                }
            }
            Err(e) => {
                println!("{}",e);
                return false
            }
        }
    }
}

/// the UI collaborator: a console thread that is the sole writer of the
/// operator flags. start/freeze/unfreeze/quit map to s/f/u/q.
fn spawn_operator_console(flags:std::sync::Arc<OperatorFlags>) {
    thread::spawn(move||{
        println!("commands: [s]tart  [f]reeze  [u]nfreeze  [q]uit");
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(l) => l,
                Err(_) => break
            };
            match line.trim() {
                "s" | "start" => flags.request_start(),
                "f" | "freeze" => flags.set_freeze(true),
                "u" | "unfreeze" => flags.set_freeze(false),
                "q" | "quit" => {
                    flags.request_exit();
                    return
                }
                "" => {}
                other => println!("unrecognized command: {}",other),
            }
        }
        // console went away; treat it as the operator closing the session
        warn!("operator console closed; exiting session");
        flags.request_exit();
    });
}
