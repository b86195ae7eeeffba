use std::error::Error;

use secrecy::SecretString;
use serde_json::json;
use teegon_sdk::api::{ApiClient, Params};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let server = "http://api.teegon.com/router".to_string();
    let app_key = "REPLACE_WITH_APP_KEY".to_string();
    let secret = "REPLACE_WITH_APP_SECRET".to_string();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let client = ApiClient::new(&server, app_key, SecretString::from(secret))?;

        let mut params = Params::new();
        params.insert("user_eid".to_string(), json!("321312312"));

        let response = client.get("shopex.query.appqueue", Some(&params)).await?;
        println!("status={} body={}", response.status, response.text());

        Ok::<(), Box<dyn Error>>(())
    })
}
