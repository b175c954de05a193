use crate::cli::{Cli, Shell};
use clap::CommandFactory;
use clap_complete::{generate, shells};
use std::io;

pub fn execute(shell: Shell) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();

    match shell {
        Shell::Bash => generate(shells::Bash, &mut cmd, &name, &mut io::stdout()),
        Shell::Zsh => generate(shells::Zsh, &mut cmd, &name, &mut io::stdout()),
        Shell::Fish => generate(shells::Fish, &mut cmd, &name, &mut io::stdout()),
        Shell::PowerShell => generate(shells::PowerShell, &mut cmd, &name, &mut io::stdout()),
        Shell::Elvish => generate(shells::Elvish, &mut cmd, &name, &mut io::stdout()),
    }
}
