//! Ping / broadcast server example
//!
//! Run with `cargo run --example simple_server`, then start one or more
//! `simple_client`s.

use netframe::{Connection, Message, ServerConfig, ServerHandler, ServerInterface};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

netframe::message_kind! {
    pub enum CustomMsgTypes {
        ServerAccept = 0,
        ServerDeny = 1,
        ServerPing = 2,
        MessageAll = 3,
        ServerMessage = 4,
    }
}

struct CustomServer;

impl ServerHandler<CustomMsgTypes> for CustomServer {
    fn on_client_connect(&self, client: &Arc<Connection<CustomMsgTypes>>) -> bool {
        if let Err(e) = client.send(&Message::new(CustomMsgTypes::ServerAccept)) {
            eprintln!("Failed to greet client: {}", e);
        }
        true
    }

    fn on_client_disconnect(&self, client: &Arc<Connection<CustomMsgTypes>>) {
        println!("Removing client [{}]", client.id());
    }

    fn on_message(
        &self,
        server: &ServerInterface<CustomMsgTypes>,
        client: &Arc<Connection<CustomMsgTypes>>,
        message: Message<CustomMsgTypes>,
    ) {
        match message.kind() {
            CustomMsgTypes::ServerPing => {
                println!("[{}]: Server Ping", client.id());
                if let Err(e) = server.message_client(client, &message) {
                    eprintln!("Failed to bounce ping: {}", e);
                }
            }
            CustomMsgTypes::MessageAll => {
                println!("[{}]: Message All", client.id());
                let mut out = Message::new(CustomMsgTypes::ServerMessage);
                out.push(client.id());
                if let Err(e) = server.message_all_clients(&out, Some(client)) {
                    eprintln!("Failed to broadcast: {}", e);
                }
            }
            _ => {}
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = ServerConfig::new("0.0.0.0:60000");
    let mut server = ServerInterface::<CustomMsgTypes>::with_config(config, Arc::new(CustomServer));
    server.start()?;

    println!("Server listening on {:?}", server.local_addr());

    loop {
        server.update(usize::MAX, true);
    }
}
