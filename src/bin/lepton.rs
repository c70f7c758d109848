// Copyright 2019 The Lepton Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Main entry point for the lepton node.

#[macro_use]
extern crate log;

use clap::{App, Arg};
use std::path::Path;
use std::sync::mpsc;

use lepton::config::ServerConfig;
use lepton::node::Server;
use lepton_util as util;

fn main() {
	let args = App::new("Lepton")
		.version(env!("CARGO_PKG_VERSION"))
		.author("The Lepton Developers")
		.about("Lightweight implementation of the Mimblewimble protocol.")
		.arg(
			Arg::with_name("config")
				.short("c")
				.long("config")
				.help("Path to the lepton-server.toml configuration file")
				.takes_value(true),
		)
		.get_matches();

	let config_path = args.value_of("config").map(Path::new);
	let config = match ServerConfig::load(config_path) {
		Ok(config) => config,
		Err(e) => {
			eprintln!("Failed to load configuration: {}", e);
			std::process::exit(1);
		}
	};

	util::init_logger(config.logging.clone());

	info!(
		"Lepton node {} starting, data dir: {}",
		env!("CARGO_PKG_VERSION"),
		config.db_root
	);
	util::log_fd_limit();

	let server = match Server::start(config) {
		Ok(server) => server,
		Err(e) => {
			error!("Failed to start server: {}", e);
			std::process::exit(1);
		}
	};

	// Block the main thread until ctrl-c (or a termination signal) and then
	// unwind everything cleanly.
	let (tx, rx) = mpsc::channel();
	ctrlc::set_handler(move || {
		let _ = tx.send(());
	})
	.expect("Error setting termination handler");

	rx.recv().expect("Could not receive from channel.");
	warn!("Received termination signal, shutting down.");
	server.stop();
}
