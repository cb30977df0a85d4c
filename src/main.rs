use std::io::{self, BufRead, Write};

use clap::Parser;
use sparemap::ui::*;

pub fn main() -> anyhow::Result<()> {
    env_logger::init();

    let argv = SparemapArgs::parse();
    let target = make_target(&argv)?;

    // message loop: one command per line on stdin, one reply (or a
    // single-line error) on stdout
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match target.message(&line) {
            Ok(reply) => writeln!(stdout, "{reply}")?,
            Err(err) => writeln!(stdout, "error: {err}")?,
        }
        stdout.flush()?;
    }

    target.detach()?;
    Ok(())
}
