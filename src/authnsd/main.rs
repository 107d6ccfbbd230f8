//! The authnsd binary: `serve` runs the daemon, `xfer` the AXFR client,
//! `notify` the NOTIFY sender. Exit codes follow the transfer tool
//! tradition: 0 up-to-date, 1 success (or a normal server exit), 3 failure.
use std::net::{SocketAddr, ToSocketAddrs};

use log::{error, info};

use authdns::error::DNSResult;
use authdns::notify::{notify_zone, NotifyOptions};
use authdns::server::run_server;
use authdns::server::stats::now_secs;
use authdns::xfer::{transfer_zone, XferOptions, XferOutcome};

mod args;
use args::{CliOptions, Command, NotifyArgs, XferArgs};

const EXIT_UPTODATE: i32 = 0;
const EXIT_SUCCESS: i32 = 1;
const EXIT_FAIL: i32 = 3;

fn main() {
    let options = match CliOptions::options() {
        Ok(options) => options,
        Err(e) => {
            eprintln!("authnsd: {:?}", e);
            std::process::exit(EXIT_FAIL);
        }
    };

    if let Err(e) = init_logging(&options) {
        eprintln!("authnsd: cannot set up logging: {:?}", e);
        std::process::exit(EXIT_FAIL);
    }

    let code = match options.command {
        Command::Serve(config) => match run_server(*config) {
            Ok(_) => EXIT_SUCCESS,
            Err(e) => {
                error!("server failed: {:?}", e);
                EXIT_FAIL
            }
        },
        Command::Xfer(args) => run_xfer(args),
        Command::Notify(args) => run_notify(args),
    };

    std::process::exit(code);
}

fn init_logging(options: &CliOptions) -> DNSResult<()> {
    let mut builder = env_logger::Builder::from_default_env();
    if options.debug {
        builder.filter_level(log::LevelFilter::Debug);
    } else {
        builder.filter_level(log::LevelFilter::Info);
    }
    if let Some(path) = &options.logfile {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();
    Ok(())
}

// resolve each server argument to addresses, skipping the unresolvable
fn resolve_servers(servers: &[String], port: u16) -> Vec<SocketAddr> {
    let mut addresses = Vec::new();
    for server in servers {
        match (server.as_str(), port).to_socket_addrs() {
            Ok(resolved) => addresses.extend(resolved),
            Err(e) => {
                log::warn!("skipping bad address {}: {}", server, e);
            }
        }
    }
    addresses
}

fn run_xfer(args: XferArgs) -> i32 {
    let masters = resolve_servers(&args.servers, args.port);
    if masters.is_empty() {
        error!("no usable master server addresses");
        return EXIT_FAIL;
    }

    let options = XferOptions {
        zone: args.zone,
        masters,
        last_serial: args.last_serial,
        tsig_key: args.tsig_key,
        output: args.file,
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("cannot start the runtime: {}", e);
            return EXIT_FAIL;
        }
    };

    match runtime.block_on(transfer_zone(&options, now_secs())) {
        Ok(XferOutcome::UpToDate) => EXIT_UPTODATE,
        Ok(XferOutcome::Transferred { serial }) => {
            info!("transfer complete, serial {}", serial);
            EXIT_SUCCESS
        }
        Err(e) => {
            error!("{:?}", e);
            EXIT_FAIL
        }
    }
}

fn run_notify(args: NotifyArgs) -> i32 {
    let targets = resolve_servers(&args.servers, args.port);
    if targets.is_empty() {
        error!("no usable server addresses");
        return EXIT_FAIL;
    }

    let options = NotifyOptions {
        zone: args.zone,
        targets,
        tsig_key: args.tsig_key,
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("cannot start the runtime: {}", e);
            return EXIT_FAIL;
        }
    };

    match runtime.block_on(notify_zone(&options, now_secs())) {
        Ok(acked) => {
            info!("{} of {} servers acknowledged", acked, options.targets.len());
            EXIT_UPTODATE
        }
        Err(e) => {
            error!("{:?}", e);
            EXIT_FAIL
        }
    }
}
