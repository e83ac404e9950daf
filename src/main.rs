use clap::Parser;
use wmbusmeters::config::{Cli, Configuration};
use wmbusmeters::{app, logging, MetersError};

const LICENSE: &str = "\
Copyright (C) 2026 the wmbusmeters authors

Licensed under either of Apache License, Version 2.0 or MIT license at your
option. Unless you explicitly state otherwise, any contribution
intentionally submitted for inclusion in this work shall be dual licensed
as above, without any additional terms or conditions.";

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    if cli.license {
        println!("{LICENSE}");
        return;
    }

    let config = match Configuration::from_cli(&cli) {
        Ok(config) => config,
        Err(e) => fail(&e),
    };

    if let Err(e) = logging::init(config.verbosity, config.logfile.clone()) {
        eprintln!("wmbusmeters: {e}");
        std::process::exit(1);
    }

    if config.shellenvs {
        for meter in &config.meters {
            println!(
                "Environment variables provided to shell for meter {}:",
                meter.family.name
            );
            println!("METER_JSON");
            println!("METER_TYPE");
            println!("METER_NAME");
            println!("METER_ID");
            println!("METER_MEDIA");
            for key in meter.family.schema {
                println!("METER_{}", key.to_uppercase());
            }
            println!("METER_TIMESTAMP");
        }
        return;
    }

    if let Err(e) = app::run(config).await {
        fail(&e);
    }
}

fn fail(e: &MetersError) -> ! {
    eprintln!("wmbusmeters: {e}");
    std::process::exit(1);
}
