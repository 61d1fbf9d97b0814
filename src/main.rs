// Copyright 2020-2022 The NATS Authors
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::io;
use std::process;

use env_logger::{Builder, Env};
use nats_siphon::{Config, Nats, Siphon};

fn main() {
    Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = match Config::try_from_args(std::env::args_os()) {
        Ok(config) => config,
        Err(err) if err.use_stderr() => {
            eprintln!("{}", err.message);
            process::exit(2);
        }
        Err(err) => {
            println!("{}", err.message);
            process::exit(0);
        }
    };

    let siphon = Siphon::new(Nats::new().with_name(&config.name), io::stdout())
        .receive_timeout(config.receive_timeout);

    if let Err(err) = siphon.run(&config) {
        log::error!("{}", err);
        if err.is_fatal() {
            process::exit(1);
        }
    }
}
