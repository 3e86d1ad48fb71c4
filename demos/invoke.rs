use clap::Parser;
use http_rmi_client::{error::Result, Outcome, RmiClient};
use serde_json::Value;

/// Invokes one HTTP-RMI method and prints its JSON result.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Implementation URL of the remote service (e.g., http://localhost/app)
    #[arg(short, long)]
    url: String,

    /// Qualified remote class name (e.g., com.foo.Service)
    #[arg(short, long)]
    class: String,

    /// Remote method name
    #[arg(short, long)]
    method: String,

    /// Method arguments, each a JSON value
    #[arg(short, long)]
    arg: Vec<String>,

    /// Run in the background and wait for the completion callback
    #[arg(long, action = clap::ArgAction::SetTrue, default_value_t = false)]
    background: bool,

    /// Enable verbose logging
    #[arg(short, long, action = clap::ArgAction::SetTrue, default_value_t = false)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    let client = RmiClient::new(&args.url)?.on_failure(|err| eprintln!("Call failed: {}", err));
    let mut invocation = client.service(&args.class).method(&args.method)?;
    for arg in &args.arg {
        let value: Value = serde_json::from_str(arg)?;
        invocation = invocation.arg(value);
    }

    if !args.background {
        let value: Value = invocation.invoke().await?;
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    let outcome = invocation
        .invoke_with(|value: Value| println!("Completed: {}", value))
        .await?;
    if let Outcome::Spawned(handle) = outcome {
        if let Err(err) = handle.await {
            eprintln!("Background call aborted: {}", err);
        }
    }
    Ok(())
}
