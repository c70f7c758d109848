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

//! Node configuration, loaded from a `lepton-server.toml` file when present
//! and falling back to sane defaults.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::core::consensus;
use crate::p2p::P2PConfig;
use crate::pool::{DandelionConfig, PoolConfig};
use crate::util::LoggingConfig;

/// The default configuration file name.
pub const SERVER_CONFIG_FILE_NAME: &str = "lepton-server.toml";

/// Which chain (and genesis block) the node runs on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum ChainType {
	/// The main production network.
	Mainnet,
	/// A local chain for development and testing, with PoW validation
	/// skipped.
	UserTesting,
}

impl Default for ChainType {
	fn default() -> ChainType {
		ChainType::Mainnet
	}
}

/// Errors loading or parsing the configuration file.
#[derive(Debug)]
pub enum ConfigError {
	/// The file could not be read.
	FileIOError(String),
	/// The file could not be parsed as TOML.
	ParseError(String),
}

impl std::fmt::Display for ConfigError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			ConfigError::FileIOError(s) => write!(f, "config file io error: {}", s),
			ConfigError::ParseError(s) => write!(f, "config file parse error: {}", s),
		}
	}
}

/// Full server configuration: one section per subsystem plus the logging
/// setup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
	/// Directory under which all chain data is stored.
	#[serde(default = "default_db_root")]
	pub db_root: String,

	/// Which chain to run on.
	#[serde(default)]
	pub chain_type: ChainType,

	/// Whether this node runs in archive mode (keeping all historical
	/// blocks) rather than pruning beyond the horizon.
	#[serde(default)]
	pub archive_mode: bool,

	/// Number of blocks a coinbase output must wait before it can be spent.
	/// A consensus value; only ever overridden on test networks.
	#[serde(default = "default_coinbase_maturity")]
	pub coinbase_maturity: u64,

	/// The p2p server configuration.
	#[serde(default)]
	pub p2p_config: P2PConfig,

	/// Transaction pool configuration.
	#[serde(default)]
	pub pool_config: PoolConfig,

	/// Dandelion relay configuration.
	#[serde(default)]
	pub dandelion_config: DandelionConfig,

	/// Logging configuration.
	#[serde(default)]
	pub logging: Option<LoggingConfig>,
}

fn default_db_root() -> String {
	".lepton".to_string()
}

fn default_coinbase_maturity() -> u64 {
	consensus::COINBASE_MATURITY
}

impl Default for ServerConfig {
	fn default() -> ServerConfig {
		ServerConfig {
			db_root: default_db_root(),
			chain_type: ChainType::default(),
			archive_mode: false,
			coinbase_maturity: default_coinbase_maturity(),
			p2p_config: P2PConfig::default(),
			pool_config: PoolConfig::default(),
			dandelion_config: DandelionConfig::default(),
			logging: Some(LoggingConfig::default()),
		}
	}
}

impl ServerConfig {
	/// Load the configuration from the provided file, or return the default
	/// configuration if no path is given.
	pub fn load(path: Option<&Path>) -> Result<ServerConfig, ConfigError> {
		let path = match path {
			Some(p) => p.to_path_buf(),
			None => {
				let default = PathBuf::from(SERVER_CONFIG_FILE_NAME);
				if !default.exists() {
					return Ok(ServerConfig::default());
				}
				default
			}
		};

		let mut contents = String::new();
		File::open(&path)
			.and_then(|mut f| f.read_to_string(&mut contents))
			.map_err(|e| ConfigError::FileIOError(format!("{}: {}", path.display(), e)))?;

		toml::from_str(&contents).map_err(|e| ConfigError::ParseError(format!("{}", e)))
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn parse_minimal_config() {
		let toml_str = r#"
			db_root = "/tmp/lepton"
			chain_type = "UserTesting"

			[p2p_config]
			host = "127.0.0.1"
			port = 13414
		"#;
		let config: ServerConfig = toml::from_str(toml_str).unwrap();
		assert_eq!(config.db_root, "/tmp/lepton");
		assert_eq!(config.chain_type, ChainType::UserTesting);
		assert_eq!(config.p2p_config.port, 13414);
		// defaults fill in the rest
		assert_eq!(config.coinbase_maturity, consensus::COINBASE_MATURITY);
	}
}
