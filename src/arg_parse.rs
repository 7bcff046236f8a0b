//! Command line surface (§6.2): leader/follower endpoints, password,
//! drift-controller toggle, verbosity, and shell completions.

use clap::{CommandFactory, Parser};
use clap_complete::Shell;

#[derive(Debug, Parser)]
#[command(
    name = "mpdsync",
    about = "Keep follower MPD instances' playback aligned with a leader"
)]
pub struct Args {
    /// Leader's address, HOST[:PORT]
    #[arg(short = 'm', long = "master", value_name = "HOST[:PORT]")]
    pub leader: String,

    /// A follower's address, HOST[:PORT][/LATENCY]; repeat for more than one
    #[arg(
        short = 's',
        long = "slave",
        value_name = "HOST[:PORT][/LATENCY]",
        required = true,
        num_args = 1..
    )]
    pub followers: Vec<String>,

    /// Password for every connection that needs one
    #[arg(short = 'p', long = "password")]
    pub password: Option<String>,

    /// Enable the latency-compensated drift controller
    #[arg(short = 'l', long = "latency-adjust")]
    pub drift: bool,

    /// Increase logging verbosity (repeatable, up to -vvv)
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Print completions for the given shell and exit
    #[arg(long = "completions", value_name = "SHELL")]
    pub completions: Option<Shell>,
}

impl Args {
    pub fn verbosity(&self) -> u8 {
        self.verbose.min(3)
    }

    pub fn print_completions(shell: Shell) {
        let mut command = Args::command();
        let name = command.get_name().to_owned();
        clap_complete::generate(shell, &mut command, name, &mut std::io::stdout());
    }
}
