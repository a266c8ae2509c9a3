// Copyright 2025 Pulse (https://github.com/pulse-registry)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use anyhow::Result;
use clap::Parser;

use pulse_server::config::ServerConfig;
use pulse_server::run_server;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const GIT_COMMIT: &str = match option_env!("PULSE_GIT_COMMIT") {
    Some(commit) => commit,
    None => "unknown",
};
const BUILD_TIME: &str = match option_env!("PULSE_BUILD_TIME") {
    Some(time) => time,
    None => "unknown",
};

#[derive(Parser, Debug)]
#[command(name = "pulse-server", disable_version_flag = true)]
struct Args {
    /// Display version information and exit.
    #[arg(long)]
    version: bool,

    /// Any other arguments are ignored.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, hide = true)]
    _rest: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.version {
        println!("Pulse Registry Stats v{VERSION}");
        println!("Git commit: {GIT_COMMIT}");
        println!("Build time: {BUILD_TIME}");
        return Ok(());
    }

    let config = ServerConfig::from_env();
    run_server(config).await
}
