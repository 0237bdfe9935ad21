//! Ping / broadcast client example
//!
//! Pings the server once a second and asks it to greet every other client on
//! every third tick.

use netframe::{ClientInterface, Message, MessageKind};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
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

fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or_default()
}

fn handle(mut message: Message<CustomMsgTypes>) -> netframe::Result<()> {
    match message.kind() {
        CustomMsgTypes::ServerAccept => println!("Server Accepted Connection"),
        CustomMsgTypes::ServerPing => {
            let sent_at: u64 = message.pop()?;
            let elapsed = Duration::from_micros(now_micros().saturating_sub(sent_at));
            println!("Ping: {:?}", elapsed);
        }
        CustomMsgTypes::ServerMessage => {
            let client_id: u32 = message.pop()?;
            println!("Hello from [{}]", client_id);
        }
        other => println!("Ignoring {:?} ({})", other, other.to_wire()),
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut client = ClientInterface::<CustomMsgTypes>::new();
    client.connect("127.0.0.1", 60000)?;

    let mut tick = 0u64;
    while client.is_connected() {
        tick += 1;

        let mut ping = Message::new(CustomMsgTypes::ServerPing);
        ping.push(now_micros());
        client.send(&ping)?;

        if tick % 3 == 0 {
            client.send(&Message::new(CustomMsgTypes::MessageAll))?;
        }

        if client.incoming().wait_timeout(Duration::from_secs(1)) {
            while let Ok(owned) = client.incoming().pop_front() {
                handle(owned.msg)?;
            }
        }
        std::thread::sleep(Duration::from_millis(500));
    }

    println!("Server Down");
    client.disconnect();
    Ok(())
}
