//! switchline CLI entry point.
//!
//! Drives live end-to-end use of the client engine: `serve` registers an
//! address and answers inbound calls (optionally tunnelling a component),
//! `dial` places a call, sends one message, and prints the reply.

use std::process::ExitCode;

use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use switchline_client::cli::{Cli, Command};
use switchline_client::{
    Call, DialOptions, MessagePayload, RegisterOptions, Session, SessionOptions, TunnelOptions,
};
use switchline_components::parse_endpoint;
use switchline_core::tracing::init_tracing;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    init_tracing(cli.debug).expect("failed to initialize tracing");

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let options = SessionOptions::new().with_debug(cli.debug);
    let session = Session::new(vec![cli.url.clone()], options);

    match &cli.command {
        Command::Serve { address, component } => {
            serve(&session, address, component.as_deref()).await
        }
        Command::Dial { to, message, .. } => {
            let result = dial(&session, to, message, cli.command_timeout()).await;
            session.close().await;
            result
        }
    }
}

async fn serve(
    session: &Session,
    address: &str,
    component: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    // Fail early on a bad component spec instead of on the first call.
    if let Some(spec) = component {
        parse_endpoint(spec)?;
    }

    let component = component.map(str::to_string);
    let _ring_sub = session.on_ring(move |call| {
        let call = call.clone();
        let component = component.clone();
        tokio::spawn(async move {
            if let Err(e) = answer_call(call, component.as_deref()).await {
                warn!(error = %e, "inbound call failed");
            }
        });
    });

    let registered = session.register(address, RegisterOptions::new()).await?;
    info!(address = %registered, "serving");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    session.close().await;
    Ok(())
}

async fn answer_call(
    call: Call,
    component: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    info!(call_id = %call.id(), peer = %call.peer(), "answering");
    call.answer().await?;

    match component {
        Some(spec) => {
            let endpoint = parse_endpoint(spec)?;
            // The handle lives in the call's hangup listener until the
            // call ends (close_on_hangup).
            call.tunnel(endpoint, TunnelOptions::new()).await?;
        }
        None => {
            let echo_call = call.clone();
            let _message_sub = call.on_message(move |payload| {
                if let MessagePayload::Text(text) = payload {
                    let call = echo_call.clone();
                    let reply = format!("Echo: {text}");
                    tokio::spawn(async move {
                        if let Err(e) = call.send(reply.as_str()).await {
                            error!(error = %e, "echo reply failed");
                        }
                    });
                }
            });
            // Keep the subscription for the lifetime of the call.
            let (done_tx, done_rx) = tokio::sync::oneshot::channel::<()>();
            let done_tx = std::sync::Mutex::new(Some(done_tx));
            let _hangup_sub = call.on_hangup(move |_| {
                if let Some(tx) = done_tx.lock().expect("hangup latch").take() {
                    let _ = tx.send(());
                }
            });
            let _ = done_rx.await;
        }
    }
    Ok(())
}

async fn dial(
    session: &Session,
    to: &str,
    message: &str,
    timeout: std::time::Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let call = session
        .dial(to, DialOptions::new().with_timeout(timeout))
        .await?;
    info!(call_id = %call.id(), peer = %call.peer(), "connected");

    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel();
    let _message_sub = call.on_message(move |payload| {
        let _ = reply_tx.send(payload.clone());
    });

    call.send(message).await?;

    match tokio::time::timeout(timeout, reply_rx.recv()).await {
        Ok(Some(MessagePayload::Text(text))) => println!("{text}"),
        Ok(Some(payload)) => println!("{payload:?}"),
        Ok(None) => warn!("call ended without a reply"),
        Err(_) => warn!("no reply within {}s", timeout.as_secs()),
    }

    call.hangup(None).await?;
    Ok(())
}
