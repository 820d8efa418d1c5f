//! Concrete player backends driven as child processes.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;
use serde_json::{json, Value};
use lumen_common::{
    error::{BackendError, ExternalUnavailable},
    BackendFactory, BackendKind, ContentRef, Geometry, LumenError, Monitor, PlayerBackend, Result,
};

const CONNECT_ATTEMPTS: u32 = 5;
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(100);
const REPLY_TIMEOUT: Duration = Duration::from_secs(2);

/// `$XDG_RUNTIME_DIR`, falling back to `/run/user/<uid>`.
pub fn runtime_dir() -> PathBuf {
    std::env::var("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let mut p = PathBuf::from("/run/user");
            let uid = rustix::process::getuid();
            p.push(format!("{}", uid.as_raw()));
            p
        })
}

fn socket_name(monitor_name: &str) -> String {
    let safe: String = monitor_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("lumen-mpv-{}.sock", safe)
}

fn mpv_args(monitor: &Monitor, socket_path: &Path) -> Vec<String> {
    vec![
        "--idle=yes".to_string(),
        "--force-window=yes".to_string(),
        format!("--input-ipc-server={}", socket_path.display()),
        format!("--geometry={}", monitor.geometry),
        format!("--title=lumen-{}", monitor.name),
        "--no-border".to_string(),
        "--no-osc".to_string(),
        "--no-input-default-bindings".to_string(),
        "--loop-playlist=inf".to_string(),
        "--hwdec=auto".to_string(),
        "--really-quiet".to_string(),
    ]
}

fn web_args(geometry: &Geometry, uri: &str, mute: bool) -> Vec<String> {
    let mut args = vec![
        "--x".to_string(),
        geometry.x.to_string(),
        "--y".to_string(),
        geometry.y.to_string(),
        "--width".to_string(),
        geometry.width.to_string(),
        "--height".to_string(),
        geometry.height.to_string(),
        "--uri".to_string(),
        uri.to_string(),
    ];
    if mute {
        args.push("--mute".to_string());
    }
    args
}

fn blur_filter(radius: Option<u32>) -> Value {
    match radius {
        Some(radius) => json!(["vf", "set", format!("lavfi=[gblur=sigma={}]", radius)]),
        None => json!(["vf", "clr", ""]),
    }
}

/// Reads an mpv IPC reply line for `request_id`. Event lines and replies to
/// other requests yield `None`.
fn parse_reply(line: &str, request_id: u64) -> Option<std::result::Result<(), String>> {
    let reply: Value = serde_json::from_str(line).ok()?;
    if reply.get("request_id")?.as_u64()? != request_id {
        return None;
    }
    let status = reply.get("error")?.as_str()?;
    if status == "success" {
        Some(Ok(()))
    } else {
        Some(Err(status.to_string()))
    }
}

fn spawn_quiet(command: &Path, args: &[String]) -> Result<Child> {
    Command::new(command)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|source| {
            LumenError::Backend(BackendError::Spawn {
                command: command.display().to_string(),
                source,
            })
        })
}

fn stop_child(child: &mut Option<Child>) {
    if let Some(mut process) = child.take() {
        if let Err(e) = process.kill() {
            log::debug!("Player process already gone: {}", e);
        }
        let _ = process.wait();
    }
}

/// mpv instance controlled over its JSON IPC socket. Used for local video,
/// playlists and streams.
///
/// One connection is kept open for the life of the process and only
/// re-established after an I/O error.
pub struct MpvPlayer {
    monitor: String,
    kind: BackendKind,
    socket_path: PathBuf,
    child: Option<Child>,
    connection: Option<BufReader<UnixStream>>,
    next_request: u64,
}

impl MpvPlayer {
    pub fn spawn(command: &Path, monitor: &Monitor, kind: BackendKind) -> Result<Self> {
        let socket_path = runtime_dir().join(socket_name(&monitor.name));
        if socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&socket_path) {
                log::warn!("Could not remove stale socket {:?}: {}", socket_path, e);
            }
        }

        let child = spawn_quiet(command, &mpv_args(monitor, &socket_path))?;
        log::debug!("Spawned {} for {} (pid {})", command.display(), monitor.name, child.id());

        Ok(Self {
            monitor: monitor.name.clone(),
            kind,
            socket_path,
            child: Some(child),
            connection: None,
            next_request: 0,
        })
    }

    fn control_error(&self, message: String) -> LumenError {
        LumenError::Backend(BackendError::Control {
            monitor: self.monitor.clone(),
            message,
        })
    }

    fn connect(&self) -> Result<BufReader<UnixStream>> {
        // mpv creates the socket shortly after start, so retry a few times
        let mut last_error = None;
        for attempt in 1..=CONNECT_ATTEMPTS {
            match UnixStream::connect(&self.socket_path) {
                Ok(stream) => {
                    stream
                        .set_read_timeout(Some(REPLY_TIMEOUT))
                        .map_err(|e| self.control_error(e.to_string()))?;
                    return Ok(BufReader::new(stream));
                }
                Err(e) => {
                    last_error = Some(e);
                    if attempt < CONNECT_ATTEMPTS {
                        thread::sleep(CONNECT_RETRY_DELAY);
                    }
                }
            }
        }

        Err(self.control_error(format!(
            "player socket {:?} unavailable: {}",
            self.socket_path,
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    fn send(&mut self, command: Value) -> Result<()> {
        let mut connection = match self.connection.take() {
            Some(connection) => connection,
            None => self.connect()?,
        };

        self.next_request += 1;
        let request_id = self.next_request;
        let payload = json!({ "command": command, "request_id": request_id });

        match exchange(&mut connection, &payload, request_id) {
            Ok(reply) => {
                self.connection = Some(connection);
                reply.map_err(|status| self.control_error(format!("{} ({})", status, payload)))
            }
            // The connection is dropped and reopened on the next command
            Err(e) => Err(self.control_error(e.to_string())),
        }
    }

    fn set_property(&mut self, name: &str, value: Value) -> Result<()> {
        self.send(json!(["set_property", name, value]))
    }
}

/// Writes one command and waits for its reply, skipping events and stale
/// replies. The outer error is an I/O failure of the connection itself.
fn exchange(
    connection: &mut BufReader<UnixStream>,
    payload: &Value,
    request_id: u64,
) -> std::io::Result<std::result::Result<(), String>> {
    writeln!(connection.get_mut(), "{}", payload)?;

    let mut line = String::new();
    loop {
        line.clear();
        if connection.read_line(&mut line)? == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "player closed the connection",
            ));
        }
        if let Some(reply) = parse_reply(&line, request_id) {
            return Ok(reply);
        }
    }
}

impl PlayerBackend for MpvPlayer {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn load(&mut self, content: &ContentRef, queue: &[ContentRef]) -> Result<()> {
        self.send(json!(["loadfile", content.to_uri(), "replace"]))?;
        for next in queue {
            self.send(json!(["loadfile", next.to_uri(), "append"]))?;
        }
        Ok(())
    }

    fn idle(&mut self) -> Result<()> {
        self.send(json!(["stop"]))
    }

    fn play(&mut self) -> Result<()> {
        self.set_property("pause", json!(false))
    }

    fn pause(&mut self) -> Result<()> {
        self.set_property("pause", json!(true))
    }

    fn set_mute(&mut self, mute: bool) -> Result<()> {
        self.set_property("mute", json!(mute))
    }

    fn set_volume(&mut self, volume: u8) -> Result<()> {
        self.set_property("volume", json!(volume))
    }

    fn set_blur(&mut self, radius: Option<u32>) -> Result<()> {
        self.send(blur_filter(radius))
    }

    fn reposition(&mut self, geometry: Geometry) -> Result<()> {
        self.set_property("geometry", json!(geometry.to_string()))
    }

    fn release(&mut self) {
        if self.child.is_none() {
            return;
        }
        if let Err(e) = self.send(json!(["quit"])) {
            log::debug!("Graceful quit for {} failed: {}", self.monitor, e);
        }
        self.connection = None;
        stop_child(&mut self.child);
        if self.socket_path.exists() {
            let _ = std::fs::remove_file(&self.socket_path);
        }
    }
}

impl Drop for MpvPlayer {
    fn drop(&mut self) {
        self.release();
    }
}

/// Web renderer process. It has no control channel, so any change to what
/// it shows means restarting it.
pub struct WebPlayer {
    monitor: String,
    command: PathBuf,
    geometry: Geometry,
    uri: Option<String>,
    mute: bool,
    child: Option<Child>,
}

impl WebPlayer {
    pub fn new(command: &Path, monitor: &Monitor) -> Self {
        Self {
            monitor: monitor.name.clone(),
            command: command.to_path_buf(),
            geometry: monitor.geometry,
            uri: None,
            mute: true,
            child: None,
        }
    }

    fn restart(&mut self) -> Result<()> {
        stop_child(&mut self.child);
        if let Some(uri) = &self.uri {
            let child = spawn_quiet(&self.command, &web_args(&self.geometry, uri, self.mute))?;
            log::debug!("Started web renderer for {} (pid {})", self.monitor, child.id());
            self.child = Some(child);
        }
        Ok(())
    }
}

impl PlayerBackend for WebPlayer {
    fn kind(&self) -> BackendKind {
        BackendKind::Web
    }

    fn load(&mut self, content: &ContentRef, queue: &[ContentRef]) -> Result<()> {
        if !queue.is_empty() {
            log::debug!("Web renderer on {} ignores {} queued pages", self.monitor, queue.len());
        }
        self.uri = Some(content.to_uri());
        self.restart()
    }

    fn idle(&mut self) -> Result<()> {
        self.uri = None;
        stop_child(&mut self.child);
        Ok(())
    }

    fn play(&mut self) -> Result<()> {
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        Ok(())
    }

    fn set_mute(&mut self, mute: bool) -> Result<()> {
        if self.mute == mute {
            return Ok(());
        }
        self.mute = mute;
        self.restart()
    }

    fn set_volume(&mut self, _volume: u8) -> Result<()> {
        Ok(())
    }

    fn set_blur(&mut self, _radius: Option<u32>) -> Result<()> {
        Ok(())
    }

    fn reposition(&mut self, geometry: Geometry) -> Result<()> {
        self.geometry = geometry;
        self.restart()
    }

    fn release(&mut self) {
        self.uri = None;
        stop_child(&mut self.child);
    }
}

impl Drop for WebPlayer {
    fn drop(&mut self) {
        self.release();
    }
}

/// The player for one monitor, tagged by what it renders.
pub enum Player {
    Video(MpvPlayer),
    Stream(MpvPlayer),
    Web(WebPlayer),
}

impl Player {
    fn backend(&mut self) -> &mut dyn PlayerBackend {
        match self {
            Player::Video(player) | Player::Stream(player) => player,
            Player::Web(player) => player,
        }
    }
}

impl PlayerBackend for Player {
    fn kind(&self) -> BackendKind {
        match self {
            Player::Video(_) => BackendKind::Video,
            Player::Stream(_) => BackendKind::Stream,
            Player::Web(_) => BackendKind::Web,
        }
    }

    fn load(&mut self, content: &ContentRef, queue: &[ContentRef]) -> Result<()> {
        self.backend().load(content, queue)
    }

    fn idle(&mut self) -> Result<()> {
        self.backend().idle()
    }

    fn play(&mut self) -> Result<()> {
        self.backend().play()
    }

    fn pause(&mut self) -> Result<()> {
        self.backend().pause()
    }

    fn set_mute(&mut self, mute: bool) -> Result<()> {
        self.backend().set_mute(mute)
    }

    fn set_volume(&mut self, volume: u8) -> Result<()> {
        self.backend().set_volume(volume)
    }

    fn set_blur(&mut self, radius: Option<u32>) -> Result<()> {
        self.backend().set_blur(radius)
    }

    fn reposition(&mut self, geometry: Geometry) -> Result<()> {
        self.backend().reposition(geometry)
    }

    fn release(&mut self) {
        self.backend().release()
    }
}

/// Spawns players from the commands configured under `[daemon]`.
pub struct ProcessBackendFactory {
    player_command: String,
    web_command: String,
}

impl ProcessBackendFactory {
    pub fn new(player_command: impl Into<String>, web_command: impl Into<String>) -> Self {
        Self {
            player_command: player_command.into(),
            web_command: web_command.into(),
        }
    }

    fn locate(command: &str) -> Result<PathBuf> {
        which::which(command).map_err(|_| {
            LumenError::External(ExternalUnavailable::ToolMissing {
                tool: command.to_string(),
            })
        })
    }
}

impl BackendFactory for ProcessBackendFactory {
    type Player = Player;

    fn create(&mut self, monitor: &Monitor, kind: BackendKind) -> Result<Player> {
        let surface_error = |e: LumenError| {
            LumenError::Backend(BackendError::SurfaceAllocation {
                monitor: monitor.name.clone(),
                message: e.to_string(),
            })
        };

        match kind {
            BackendKind::Video | BackendKind::Stream => {
                let command = Self::locate(&self.player_command).map_err(surface_error)?;
                let player = MpvPlayer::spawn(&command, monitor, kind).map_err(surface_error)?;
                Ok(if kind == BackendKind::Stream {
                    Player::Stream(player)
                } else {
                    Player::Video(player)
                })
            }
            BackendKind::Web => {
                let command = Self::locate(&self.web_command).map_err(surface_error)?;
                Ok(Player::Web(WebPlayer::new(&command, monitor)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixListener;
    use tempfile::tempdir;

    fn hdmi1() -> Monitor {
        Monitor::new("HDMI-1", Geometry::new(2560, 0, 1920, 1080), false)
    }

    #[test]
    fn test_mpv_args_place_window_on_monitor() {
        let args = mpv_args(&hdmi1(), Path::new("/run/user/1000/lumen-mpv-HDMI-1.sock"));
        assert!(args.contains(&"--geometry=1920x1080+2560+0".to_string()));
        assert!(args.contains(&"--input-ipc-server=/run/user/1000/lumen-mpv-HDMI-1.sock".to_string()));
        assert!(args.contains(&"--idle=yes".to_string()));
        assert!(args.contains(&"--loop-playlist=inf".to_string()));
    }

    #[test]
    fn test_socket_name_is_filesystem_safe() {
        assert_eq!(socket_name("DP-1"), "lumen-mpv-DP-1.sock");
        assert_eq!(socket_name("eDP 1/x"), "lumen-mpv-eDP_1_x.sock");
    }

    #[test]
    fn test_web_args() {
        let args = web_args(&Geometry::new(0, 0, 800, 600), "https://example.com", true);
        assert_eq!(
            args,
            vec![
                "--x", "0", "--y", "0", "--width", "800", "--height", "600",
                "--uri", "https://example.com", "--mute",
            ]
        );
        assert!(!web_args(&Geometry::new(0, 0, 800, 600), "file:///a.html", false)
            .contains(&"--mute".to_string()));
    }

    #[test]
    fn test_blur_filter_commands() {
        assert_eq!(blur_filter(Some(8)), json!(["vf", "set", "lavfi=[gblur=sigma=8]"]));
        assert_eq!(blur_filter(None), json!(["vf", "clr", ""]));
    }

    #[test]
    fn test_parse_reply_skips_events() {
        assert_eq!(parse_reply(r#"{"event":"playback-restart"}"#, 1), None);
        assert_eq!(parse_reply(r#"{"data":null,"error":"success","request_id":1}"#, 1), Some(Ok(())));
        assert_eq!(
            parse_reply(r#"{"error":"property not found","request_id":4}"#, 4),
            Some(Err("property not found".to_string()))
        );
        assert_eq!(parse_reply(r#"{"error":"success","request_id":3}"#, 4), None);
        assert_eq!(parse_reply("not json", 1), None);
    }

    #[test]
    fn test_mpv_commands_share_one_connection() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("mpv.sock");
        let listener = UnixListener::bind(&socket_path).unwrap();

        // Accepts a single connection, so a reconnect would time out
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut writer = stream.try_clone().unwrap();
            let mut handled = 0;
            for line in BufReader::new(stream).lines() {
                let request: Value = serde_json::from_str(&line.unwrap()).unwrap();
                let id = request["request_id"].as_u64().unwrap();
                writeln!(writer, r#"{{"event":"property-change"}}"#).unwrap();
                writeln!(writer, r#"{{"error":"success","request_id":{}}}"#, id).unwrap();
                handled += 1;
            }
            handled
        });

        let mut player = MpvPlayer {
            monitor: "HDMI-1".to_string(),
            kind: BackendKind::Video,
            socket_path,
            child: None,
            connection: None,
            next_request: 0,
        };
        player.set_volume(40).unwrap();
        player.set_mute(true).unwrap();
        player.play().unwrap();
        drop(player);

        assert_eq!(server.join().unwrap(), 3);
    }

    #[test]
    fn test_missing_player_command_fails_allocation() {
        let mut factory = ProcessBackendFactory::new("lumen-no-such-player", "lumen-no-such-webview");
        for kind in [BackendKind::Video, BackendKind::Web] {
            match factory.create(&hdmi1(), kind) {
                Err(LumenError::Backend(BackendError::SurfaceAllocation { monitor, message })) => {
                    assert_eq!(monitor, "HDMI-1");
                    assert!(message.contains("lumen-no-such"));
                }
                Err(other) => panic!("Expected SurfaceAllocation, got {:?}", other),
                Ok(_) => panic!("Expected SurfaceAllocation, got a player"),
            }
        }
    }

    #[test]
    fn test_web_player_state_before_load_spawns_nothing() {
        let mut player = WebPlayer::new(Path::new("/nonexistent/lumen-webview"), &hdmi1());
        assert!(player.set_mute(false).is_ok());
        assert!(player.reposition(Geometry::new(0, 0, 800, 600)).is_ok());
        assert!(player.child.is_none());

        // The first real spawn happens on load, already unmuted
        assert!(player.load(&"https://example.com".into(), &[]).is_err());
        assert!(!player.mute);
    }

    #[test]
    fn test_web_player_idle_without_process() {
        let mut player = WebPlayer::new(Path::new("/bin/true"), &hdmi1());
        assert!(player.idle().is_ok());
        assert!(player.pause().is_ok());
        assert_eq!(player.kind(), BackendKind::Web);
        player.release();
    }
}
