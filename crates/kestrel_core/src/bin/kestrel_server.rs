/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use kestrel_core::config::CoreConfig;
use kestrel_core::runtime;
use std::path::PathBuf;

fn parse_config_path() -> Result<Option<PathBuf>> {
    let mut args = std::env::args().skip(1);
    match args.next() {
        Some(a) if a == "--help" || a == "-h" => {
            println!("usage: kestrel_server [config.json]");
            std::process::exit(0);
        }
        Some(a) => Ok(Some(PathBuf::from(a))),
        None => Ok(None),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = match parse_config_path()? {
        Some(path) => CoreConfig::load(&path).with_context(|| format!("load config {}", path.display()))?,
        None => CoreConfig::default(),
    };
    runtime::run(cfg).await
}
