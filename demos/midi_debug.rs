use std::time::Duration;

use canora::{InputSource, MidiInputDevice};
use midir::MidiInput;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let midi_in = MidiInput::new("canora").expect("failed to create MIDI input");
    println!("Available MIDI inputs:");
    for (i, port) in midi_in.ports().iter().enumerate() {
        println!("  {}: {}", i, midi_in.port_name(port).unwrap_or_default());
    }
    drop(midi_in);

    let name = std::env::args().nth(1);
    let mut input =
        MidiInputDevice::open_matching(name.as_deref()).expect("no MIDI input found");

    println!("Listening for key events. Ctrl+C to quit.\n");
    loop {
        if input.poll() {
            for event in input.read(16) {
                if event.velocity > 0 {
                    println!("press   pitch={:>3} vel={}", event.pitch, event.velocity);
                } else {
                    println!("release pitch={:>3}", event.pitch);
                }
            }
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}
