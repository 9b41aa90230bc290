//! Minimal echo server: accepts one connection and echoes text back.
//!
//! Run with:
//!   cargo run -p genipc --example tcp-echo --features logging -- 7000
//!
//! Set GENIPC_LOG_LEVEL=debug to see socket events.
//!
//! In another terminal:
//!   nc 127.0.0.1 7000

use std::io::Write;

use genipc::logging::init_logging_from_env;
use genipc::SocketFactory;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging_from_env();

    let port = match std::env::args().nth(1) {
        Some(arg) => arg.parse()?,
        None => 0,
    };

    let mut factory = SocketFactory::new();
    factory.bind(port)?;
    eprintln!(
        "Listening on {}:{}",
        SocketFactory::hostname()?,
        factory.port()
    );

    let mut endpoint = factory.accept()?;
    eprintln!("Peer connected: {}:{}", endpoint.host(), endpoint.serv());

    let mut text = String::new();
    loop {
        match endpoint.recv_string(&mut text) {
            Ok(0) => {
                eprintln!("Peer disconnected");
                break;
            }
            Ok(read) => {
                eprintln!("Received {read} bytes");
                endpoint.write_all(text.as_bytes())?;
            }
            Err(e) => {
                eprintln!("Receive failed: {e}");
                break;
            }
        }
    }

    factory.close();
    Ok(())
}
