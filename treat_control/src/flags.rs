use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// the fixed set of operator commands crossing the UI/control-loop boundary.
/// The UI side is the sole writer of every flag; the control loop only reads
/// (start is consumed with a swap so one press means one start). No shared
/// workspace, no other channels.
pub struct OperatorFlags {
    start:AtomicBool,
    freeze:AtomicBool,
    exit:AtomicBool,
}

impl OperatorFlags {

    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            start: AtomicBool::new(false),
            freeze: AtomicBool::new(false),
            exit: AtomicBool::new(false),
        })
    }

    // -- UI side --

    pub fn request_start(&self) {
        self.start.store(true,Ordering::SeqCst);
    }

    /// freeze is a level: true pauses the loop, false lets it resume
    pub fn set_freeze(&self,frozen:bool) {
        self.freeze.store(frozen,Ordering::SeqCst);
    }

    pub fn request_exit(&self) {
        self.exit.store(true,Ordering::SeqCst);
    }

    // -- control-loop side --

    pub fn take_start(&self) -> bool {
        self.start.swap(false,Ordering::SeqCst)
    }

    pub fn freeze_requested(&self) -> bool {
        self.freeze.load(Ordering::SeqCst)
    }

    pub fn exit_requested(&self) -> bool {
        self.exit.load(Ordering::SeqCst)
    }
}

#[derive(Debug,Clone,Copy,PartialEq)]
pub enum StatusColor {
    Idle,
    Active,
    Paused,
}

/// display collaborator: invoked after every state transition and at least
/// once per polling interval while the loop is waiting
pub trait StatusDisplay {
    fn update(&mut self,progress:f32,message:&str,color:StatusColor);
}

/// console display for headless runs; prints only when the message changes
/// so 1 ms cooldown polling doesn't flood the terminal
pub struct ConsoleDisplay {
    last_message:String,
}

impl ConsoleDisplay {
    pub fn new() -> Self {
        Self{last_message:String::new()}
    }
}

impl StatusDisplay for ConsoleDisplay {
    fn update(&mut self,progress:f32,message:&str,color:StatusColor) {
        if message != self.last_message {
            let tag = match color {
                StatusColor::Idle => "idle",
                StatusColor::Active => "active",
                StatusColor::Paused => "paused",
            };
            println!("[{:>3.0}%] ({}) {}",progress*100.0,tag,message);
            self.last_message = message.to_string();
        }
    }
}
