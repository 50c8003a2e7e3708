//! `nova-data` command line.

#[tokio::main]
async fn main() {
    if let Err(e) = nova_data::cli::run().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
