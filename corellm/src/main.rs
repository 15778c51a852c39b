#[tokio::main]
async fn main() {
    if let Err(e) = corellm_lib::run().await {
        eprintln!("corellm: {}", e);
        std::process::exit(1);
    }
}
