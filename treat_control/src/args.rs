use std::path::PathBuf;

#[derive(clap::Parser,Debug)]
pub struct TreatControlArgs {
    #[command(subcommand)]
    pub action: Action,
}

#[derive(clap::Subcommand,Debug)]
pub enum Action {
    /// write a default sequence-parameter file to edit
    NewParams(PathArgs),
    /// check a parameter file against the burst-interval invariant
    Validate(PathArgs),
    /// acquire the hardware and run a treatment delivery session
    Run(RunArgs),
    /// show the current activation token holder
    Status,
    /// release an activation token held by this process identity
    Release,
}

#[derive(clap::Args,Debug)]
pub struct PathArgs {
    pub path:PathBuf,
}

#[derive(clap::Args,Debug)]
pub struct RunArgs {
    /// sequence-parameter json file
    pub path:PathBuf,
    /// delivery backend (sim, vendor)
    #[clap(short, long)]
    pub system:Option<String>,
    /// transducer warn limit in degrees C
    #[clap(long)]
    pub warn_limit:Option<f32>,
    /// transducer error limit in degrees C
    #[clap(long)]
    pub error_limit:Option<f32>,
    /// start transmitting immediately instead of waiting for the start command
    #[clap(long)]
    pub auto_start:bool,
}
