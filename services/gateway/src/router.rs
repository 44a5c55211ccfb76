use std::sync::Arc;

use axum::Router;
use axum::response::Html;
use axum::routing::get;
use tower_http::services::ServeDir;

use crate::state::AppState;
use crate::ws::ws_handler;

const INDEX_PAGE: &str = r#"<!DOCTYPE html>
<html lang="ru">
<head>
  <meta charset="utf-8">
  <title>Говор — голосовой ассистент</title>
  <link rel="stylesheet" href="/static/style.css">
</head>
<body>
  <main>
    <h1>Говор</h1>
    <p>Нажмите на микрофон и говорите. Ассистент ответит голосом.</p>
    <button id="mic">🎤</button>
    <div id="transcript"></div>
  </main>
  <script src="/static/app.js"></script>
</body>
</html>
"#;

async fn index() -> Html<&'static str> {
    Html(INDEX_PAGE)
}

pub fn create_router(state: Arc<AppState>) -> Router {
    let static_dir = state.config.static_dir.clone();
    Router::new()
        .route("/", get(index))
        .route("/ws/recognize", get(ws_handler))
        .nest_service("/static", ServeDir::new(static_dir))
        .with_state(state)
}
