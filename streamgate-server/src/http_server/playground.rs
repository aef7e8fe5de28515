use axum::response::Html;

const PLAYGROUND_PAGE: &str = include_str!("playground.html");

/// `GET /`: a static page of example requests.
pub(crate) async fn playground() -> Html<&'static str> {
    Html(PLAYGROUND_PAGE)
}
