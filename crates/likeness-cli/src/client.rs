use anyhow::Result;
use zbus::{proxy, Connection};

#[proxy(
    interface = "org.freedesktop.Likeness1",
    default_service = "org.freedesktop.Likeness1",
    default_path = "/org/freedesktop/Likeness1"
)]
trait Likeness {
    fn status(&self) -> zbus::Result<String>;
}

/// Ask a running `likenessd` for its status JSON.
pub async fn status(session_bus: bool) -> Result<String> {
    let conn = if session_bus {
        Connection::session().await?
    } else {
        Connection::system().await?
    };
    let proxy = LikenessProxy::new(&conn).await?;
    Ok(proxy.status().await?)
}
