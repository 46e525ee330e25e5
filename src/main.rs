use std::path::PathBuf;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Optional config path as first argument
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    learning_gateway_lib::run(config_path).await
}
