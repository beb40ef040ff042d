//! kiln driver entry point.

mod cli;

use clap::Parser;
use cli::Cli;
use kiln::{AddKOptions, PipelineError, PipelineOptions, VerifyPolicy, programs};
use kiln_cranelift::{EmitOptions, MachineConfig};
use tracing_subscriber::EnvFilter;

fn main() {
    init_tracing();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("KILN_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<(), PipelineError> {
    let mut module = programs::build(
        cli.program,
        AddKOptions {
            ty: cli.width,
            k: cli.k,
        },
    )?;

    let options = PipelineOptions {
        print_ir: !cli.quiet,
        policy: if cli.strict {
            VerifyPolicy::Strict
        } else {
            VerifyPolicy::Permissive
        },
        emit: EmitOptions {
            target: cli.target,
            machine: MachineConfig {
                cpu: cli.cpu,
                features: cli.features,
                opt_level: cli.opt_level,
                reloc_model: cli.reloc,
            },
            output: cli.emit.into(),
        },
    };

    kiln::run(&mut module, &cli.output, &options)?;
    Ok(())
}
