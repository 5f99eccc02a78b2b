//! Walk the engine through a scripted handshake and print each step.
//!
//! The "broker" here is a few frames encoded with the crate's own codec;
//! in a real program the bytes would come from a TCP socket instead.
//!
//! Run with: cargo run --example handshake

use bytes::BytesMut;

use amqp_engine::methods::{connection as connection_args, Method};
use amqp_engine::{Connection, ConnectionOptions, FieldTable, Frame};

fn broker_frame(channel: u16, method: Method) -> Vec<u8> {
    let mut out = BytesMut::new();
    Frame::method(channel, method.encode().unwrap()).encode(&mut out);
    out.to_vec()
}

fn main() -> amqp_engine::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(tracing::level_filters::LevelFilter::DEBUG)
        .with_target(false)
        .init();

    let mut conn = Connection::new(ConnectionOptions::default());
    conn.on_ready(|| println!("-> handshake complete, connection ready"));

    let header = conn.drain_output();
    println!("client sends protocol header: {:02x?}", &header[..]);

    conn.push_bytes(&broker_frame(
        0,
        Method::ConnectionStart(connection_args::Start {
            version_major: 0,
            version_minor: 9,
            server_properties: FieldTable::new().with("product", "RabbitMQ"),
            mechanisms: "PLAIN AMQPLAIN".into(),
            locales: "en_US".into(),
        }),
    ))?;
    println!("client answers start-ok ({} bytes queued)", conn.output().len());

    conn.push_bytes(&broker_frame(
        0,
        Method::ConnectionTune(connection_args::Tune {
            channel_max: 0,
            frame_max: 131_072,
            heartbeat: 60,
        }),
    ))?;
    println!(
        "client answers tune-ok + open ({} bytes queued)",
        conn.output().len()
    );

    conn.push_bytes(&broker_frame(0, Method::ConnectionOpenOk))?;
    println!(
        "negotiated: frame_max={} heartbeat={}s",
        conn.frame_max(),
        conn.heartbeat()
    );
    Ok(())
}
