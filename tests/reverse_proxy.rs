use {
    axum::{
        http::{HeaderMap, StatusCode, Uri},
        Router,
    },
    gatehouse_cli::{router, Upstream},
    gatehouse_config::ExtAuth,
    gatehouse_ext_auth::AuthGate,
    std::{net::SocketAddr, time::Duration},
    tokio::net::TcpListener,
    url::Url,
};

async fn spawn_server(app: Router) -> Result<SocketAddr, Box<dyn std::error::Error>> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move { axum::serve(listener, app).await });
    Ok(addr)
}

/// Allows requests carrying `Authorization: Bearer good`, tagging them with the caller's identity.
async fn spawn_verifier() -> Result<SocketAddr, Box<dyn std::error::Error>> {
    let app = Router::new().fallback(|headers: HeaderMap| async move {
        let authorized = headers
            .get("authorization")
            .map(|value| value == "Bearer good")
            .unwrap_or(false);
        if authorized {
            (
                StatusCode::OK,
                [("x-user-id", "42"), ("set-cookie", "role=admin; Path=/")],
                "",
            )
        } else {
            (
                StatusCode::FORBIDDEN,
                [("x-denied", "true"), ("x-ignored", "true")],
                "access denied",
            )
        }
    });
    spawn_server(app).await
}

/// Echoes the request it received so the test can see what crossed the proxy.
async fn spawn_upstream() -> Result<SocketAddr, Box<dyn std::error::Error>> {
    let app = Router::new().fallback(|uri: Uri, headers: HeaderMap, body: String| async move {
        let user = headers
            .get("x-user-id")
            .and_then(|value| value.to_str().ok())
            .unwrap_or("anonymous")
            .to_string();
        let cookie = headers
            .get("cookie")
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        (
            StatusCode::CREATED,
            format!("{} user={} cookie={} body={}", uri, user, cookie, body),
        )
    });
    spawn_server(app).await
}

async fn spawn_proxy(
    verifier: SocketAddr,
    upstream: SocketAddr,
) -> Result<SocketAddr, Box<dyn std::error::Error>> {
    let gate = AuthGate::new(&ExtAuth {
        proxy: format!("http://{}", verifier),
        timeout: Duration::from_secs(5),
        ..Default::default()
    })?;
    let upstream = Upstream::with_base(Url::parse(&format!("http://{}", upstream))?)?;
    spawn_server(router(gate, upstream)).await
}

#[tokio::test]
async fn test_reverse_proxy_allows_and_enriches() -> Result<(), Box<dyn std::error::Error>> {
    let proxy = spawn_proxy(spawn_verifier().await?, spawn_upstream().await?).await?;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://{}/orders/7?expand=items", proxy))
        .header("Authorization", "Bearer good")
        .header("Cookie", "session=abc")
        .body("payload")
        .send()
        .await?;

    assert_eq!(response.status(), reqwest::StatusCode::CREATED);
    assert_eq!(
        response.text().await?,
        "/orders/7?expand=items user=42 cookie=session=abc; role=admin body=payload"
    );

    Ok(())
}

#[tokio::test]
async fn test_reverse_proxy_denies() -> Result<(), Box<dyn std::error::Error>> {
    let proxy = spawn_proxy(spawn_verifier().await?, spawn_upstream().await?).await?;

    let client = reqwest::Client::new();
    let response = client
        .get(format!("http://{}/orders/7", proxy))
        .header("Authorization", "Bearer bad")
        .send()
        .await?;

    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);
    // Only the body of a denial is relayed, never its headers.
    assert!(response.headers().get("x-denied").is_none());
    assert_eq!(response.text().await?, "access denied");

    Ok(())
}

#[tokio::test]
async fn test_reverse_proxy_upstream_unavailable() -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let unavailable = listener.local_addr()?;
    drop(listener);

    let proxy = spawn_proxy(spawn_verifier().await?, unavailable).await?;

    let client = reqwest::Client::new();
    let response = client
        .get(format!("http://{}/", proxy))
        .header("Authorization", "Bearer good")
        .send()
        .await?;
    assert_eq!(response.status(), reqwest::StatusCode::BAD_GATEWAY);

    Ok(())
}
