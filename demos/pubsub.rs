//! Declare a queue, publish to it, and consume the delivery back -
//! against a scripted broker.
//!
//! Run with: cargo run --example pubsub

use bytes::BytesMut;

use amqp_engine::methods::{basic, connection as connection_args, queue, Method};
use amqp_engine::{flags, Connection, ConnectionOptions, Envelope, FieldTable, Frame, Properties};

fn broker_method(channel: u16, method: Method) -> Vec<u8> {
    let mut out = BytesMut::new();
    Frame::method(channel, method.encode().unwrap()).encode(&mut out);
    out.to_vec()
}

fn broker_content(channel: u16, body: &[u8]) -> Vec<u8> {
    let mut out = BytesMut::new();
    let header = amqp_engine::ContentHeader::basic(body.len() as u64, Properties::default());
    Frame::header(channel, header.encode().unwrap()).encode(&mut out);
    Frame::body(channel, bytes::Bytes::copy_from_slice(body)).encode(&mut out);
    out.to_vec()
}

fn main() -> amqp_engine::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(tracing::level_filters::LevelFilter::DEBUG)
        .with_target(false)
        .init();

    let mut conn = Connection::new(ConnectionOptions::default());
    let _ = conn.drain_output();
    conn.push_bytes(&broker_method(
        0,
        Method::ConnectionStart(connection_args::Start {
            version_major: 0,
            version_minor: 9,
            server_properties: FieldTable::new(),
            mechanisms: "PLAIN".into(),
            locales: "en_US".into(),
        }),
    ))?;
    conn.push_bytes(&broker_method(
        0,
        Method::ConnectionTune(connection_args::Tune {
            channel_max: 0,
            frame_max: 131_072,
            heartbeat: 0,
        }),
    ))?;
    conn.push_bytes(&broker_method(0, Method::ConnectionOpenOk))?;

    let id = conn.open_channel()?;
    conn.push_bytes(&broker_method(id, Method::ChannelOpenOk))?;

    conn.channel(id)?
        .declare_queue("jobs", flags::DURABLE, None)?
        .on_success(|name, messages, consumers| {
            println!("queue '{name}' ready ({messages} messages, {consumers} consumers)");
        });
    conn.push_bytes(&broker_method(
        id,
        Method::QueueDeclareOk(queue::DeclareOk {
            queue: "jobs".into(),
            message_count: 0,
            consumer_count: 0,
        }),
    ))?;

    let accepted = conn
        .channel(id)?
        .publish("", "jobs", &Envelope::from("work item #1").persistent(), 0);
    println!("publish accepted: {accepted}");

    conn.channel(id)?
        .consume("jobs", "", 0, None)?
        .on_success(|tag| println!("consuming as {tag}"))
        .on_received(|delivery| {
            println!(
                "received: {:?} (delivery tag {})",
                String::from_utf8_lossy(&delivery.message.envelope.body),
                delivery.delivery_tag
            );
        });
    conn.push_bytes(&broker_method(
        id,
        Method::BasicConsumeOk {
            consumer_tag: "amq.ctag-demo".into(),
        },
    ))?;

    // The broker loops our published message back to the consumer.
    conn.push_bytes(&broker_method(
        id,
        Method::BasicDeliver(basic::Deliver {
            consumer_tag: "amq.ctag-demo".into(),
            delivery_tag: 1,
            redelivered: false,
            exchange: "".into(),
            routing_key: "jobs".into(),
        }),
    ))?;
    conn.push_bytes(&broker_content(id, b"work item #1"))?;

    conn.channel(id)?.ack(1, 0);
    println!("acked; {} bytes waiting for the transport", conn.output().len());
    Ok(())
}
