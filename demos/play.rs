use std::path::PathBuf;
use std::time::{Duration, Instant};

use canora::{Engine, EngineCommand, EngineConfig, EngineUpdate, Song, spawn_engine};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let path: PathBuf = std::env::args()
        .nth(1)
        .expect("usage: play <file.mid>")
        .into();
    let song = Song::load(&path).expect("failed to load song");
    let length = song.duration();
    println!(
        "Playing {:?}: {} voice(s), {:.1}s",
        path,
        song.voices.len(),
        length
    );

    let engine = Engine::with_default_devices(EngineConfig::default()).expect("failed to start");
    let handle = spawn_engine(engine);
    handle
        .command_tx
        .send(EngineCommand::PlaySong(song))
        .expect("engine thread gone");

    let deadline = Instant::now() + Duration::from_secs_f64(length + 1.0);
    while Instant::now() < deadline {
        match handle.update_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(EngineUpdate::ActiveNotes { manual, auto }) => {
                println!("manual: {:?}  auto: {:?}", manual, auto);
            }
            Ok(EngineUpdate::Error { message }) => eprintln!("error: {message}"),
            Ok(_) | Err(_) => {}
        }
    }

    let _ = handle.command_tx.send(EngineCommand::Stop);
    for update in handle.update_rx.iter() {
        if matches!(update, EngineUpdate::Stopped) {
            break;
        }
    }
    println!("Done.");
}
