pub async fn handle() -> &'static str {
    "ok"
}
