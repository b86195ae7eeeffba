use std::error::Error;

use secrecy::SecretString;
use teegon_sdk::api::ApiClient;
use teegon_sdk::notify::{NotifyOptions, NotifySession};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let server = "http://api.teegon.com/router".to_string();
    let app_key = "REPLACE_WITH_APP_KEY".to_string();
    let secret = "REPLACE_WITH_APP_SECRET".to_string();
    let topic = "sendmsg".to_string();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let client = ApiClient::new(&server, app_key, SecretString::from(secret))?;
        let session = NotifySession::connect(client, NotifyOptions::default()).await?;

        let mut queue = session.subscribe(&topic).await?;
        session.publish(&topic, "demo", "hello from rust").await?;

        while let Some(delivery) = queue.recv().await {
            let message = &delivery.message;
            println!(
                "topic={} partition={} offset={} key={} data={}",
                message.topic,
                message.partition,
                message.offset,
                message.key.as_deref().unwrap_or(""),
                message.data.as_deref().unwrap_or(""),
            );
            if let Err(err) = delivery.ack().await {
                eprintln!("ack failed: {err}");
            }
        }

        session.close().await;
        Ok::<(), Box<dyn Error>>(())
    })
}
