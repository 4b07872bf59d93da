use futures_util::StreamExt;
use squall::{ws::Source, Config};

#[tokio::main]
async fn main() {
    pretty_env_logger::init();

    let token = std::env::var("BOT_TOKEN")
        .map_err(|_| {
            println!("No BOT_TOKEN env var or invalid");
            std::process::exit(1);
        })
        .unwrap();

    let (source, mut events) = Source::with_bot_token(&token, true, Config::default()).unwrap();

    source.connect();

    while let Some(event) = events.next().await {
        log::info!("Received event: {}", event);
        log::debug!("Connection state: {}", source.current_state());
    }
}
