//! Ctl command: one request against a daemon's control surface.

use anyhow::{Context, Result};
use reqwest::{Client, RequestBuilder};

/// `GET http://<addr>/<command>`, with `?name=` when a name is given.
pub fn request(client: &Client, addr: &str, command: &str, name: Option<&str>) -> RequestBuilder {
    let builder = client.get(format!("http://{addr}/{command}"));
    match name {
        Some(name) => builder.query(&[("name", name)]),
        None => builder,
    }
}

pub async fn run(addr: &str, command: &str, name: Option<&str>) -> Result<()> {
    let client = Client::new();
    let response = request(&client, addr, command, name)
        .send()
        .await
        .with_context(|| format!("{command} request to {addr} failed"))?;
    let status = response.status();
    let body = response.text().await.context("cannot read the reply")?;

    println!("{body}");
    if !status.is_success() {
        anyhow::bail!("{command} failed with {status}");
    }
    Ok(())
}
