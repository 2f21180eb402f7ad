//! Process bootstrap for a single raftkv node: parse CLI flags, load
//! timing overrides from a config file, and run the event loop against
//! stdin/stdout until end-of-input or a fatal invariant violation.

#[macro_use]
extern crate slog;

use std::process;

use clap::{App, Arg};

use raftkv_core::logger::get_root_logger;
use raftkv_raft::config::RaftConfig;
use raftkv_raft::node::Node;
use raftkv_raft::transport::StdioTransport;

fn main() {
    let matches = App::new("raftkv")
        .version("0.1.0")
        .author("jcm")
        .about("A single Raft-replicated key/value node speaking newline-delimited JSON on stdio.")
        .arg(
            Arg::with_name("config")
                .long("config")
                .value_name("PATH")
                .required(false)
                .default_value("Config.toml")
                .help("Location of the config file (election/replication timing overrides)."),
        )
        .get_matches();

    let config_path = matches.value_of("config").unwrap();
    let logger = get_root_logger();

    let mut sources = config::Config::default();
    // The config file is optional: a fresh deployment runs on defaults
    // until someone drops a Config.toml next to the binary.
    if let Err(e) = sources.merge(config::File::with_name(config_path).required(false)) {
        crit!(logger, "failed to read config file"; "path" => config_path, "error" => %e);
        process::exit(1);
    }

    let raft_config = match RaftConfig::from_sources(sources) {
        Ok(cfg) => cfg,
        Err(e) => {
            crit!(logger, "invalid configuration"; "error" => %e);
            process::exit(1);
        }
    };

    let node = Node::new(raft_config, logger.clone(), StdioTransport::new());
    if let Err(e) = node.run() {
        crit!(logger, "node terminated"; "error" => %e);
        process::exit(1);
    }
}
