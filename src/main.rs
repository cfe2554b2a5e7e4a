//! filevault - command-line client for a filevaultd server

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::io::Write as _;
use std::path::Path;

use filevault::cli::{ClientCommand, ClientOpts, Target};
use filevault::client;
use filevault::codec::{Lookup, Response};

fn lookup_of(target: &Target) -> Result<(Lookup, String)> {
    match (target.id, target.name.as_ref()) {
        (Some(id), None) => Ok((Lookup::ById, id.to_string())),
        (None, Some(name)) => Ok((Lookup::ByName, name.clone())),
        _ => bail!("specify exactly one of --id or --name"),
    }
}

fn save_new_file(path: &Path, content: &[u8]) -> Result<()> {
    let mut f = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .with_context(|| format!("create {}", path.display()))?;
    f.write_all(content)?;
    Ok(())
}

fn describe_failure(response: &Response) -> &'static str {
    match response {
        Response::Forbidden => "The response says that creating the file was forbidden!",
        Response::NotFound => "The response says that this file is not found!",
        _ => "Unexpected response from server",
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    filevault::init_tracing("warn");
    let opts = ClientOpts::parse();
    let addr = opts.server.as_str();

    match opts.command {
        ClientCommand::Put { file, server_name } => {
            let content = tokio::fs::read(&file)
                .await
                .with_context(|| format!("read {}", file.display()))?;
            let name = match server_name.filter(|s| !s.is_empty()) {
                Some(n) => n,
                None => file
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .with_context(|| format!("{} has no file name", file.display()))?,
            };
            let response = client::put(addr, &name, content).await?;
            println!("The request was sent.");
            match response {
                Response::Stored(id) => println!("Response says that file is saved! ID = {}", id),
                other => println!("{}", describe_failure(&other)),
            }
        }
        ClientCommand::Get { target, out } => {
            let (lookup, identifier) = lookup_of(&target)?;
            let response = client::get(addr, lookup, &identifier).await?;
            println!("The request was sent.");
            match response {
                Response::Content(bytes) => {
                    println!("The file was downloaded!");
                    save_new_file(&out, &bytes)?;
                    println!("File saved on hard drive!");
                }
                other => println!("{}", describe_failure(&other)),
            }
        }
        ClientCommand::Delete { target } => {
            let (lookup, identifier) = lookup_of(&target)?;
            let response = client::delete(addr, lookup, &identifier).await?;
            println!("The request was sent.");
            match response {
                Response::Deleted => {
                    println!("The response says that this file was deleted successfully!")
                }
                other => println!("{}", describe_failure(&other)),
            }
        }
        ClientCommand::Exit => {
            client::exit(addr).await?;
            println!("The request was sent.");
        }
    }
    Ok(())
}
