use tokio::net::TcpListener;

/// Serves the wirecall test routes. `HOST` and `PORT` pick the bind address.
#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".to_string());
    let listener = TcpListener::bind(format!("{host}:{port}")).await?;
    println!(
        "wirecall mock server on http://{} (users, q, form, headers, session, status, slow, text)",
        listener.local_addr()?
    );
    mock_server::run(listener).await
}
