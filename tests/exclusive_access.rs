// Concurrency checks for the protocol client through an instrumented stream
//
// The stream records every frame written and flags any write that starts
// while a previous command's reply has not been fully read.

use std::collections::VecDeque;
use std::io::{self, ErrorKind, Read, Write};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use serial_motor_bridge::motor::{
    ChannelError, ProtocolClient, ProtocolError, SerialChannel, SerialEndpoint, Stream,
};

#[derive(Default)]
struct WireState {
    pending: VecDeque<u8>,
    in_flight: bool,
    violations: usize,
    frames: Vec<String>,
    on_write: Option<Sender<()>>,
}

#[derive(Clone, Default)]
struct InstrumentedStream {
    state: Arc<Mutex<WireState>>,
}

impl Stream for InstrumentedStream {}

impl Write for InstrumentedStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock().unwrap();
        if state.in_flight {
            state.violations += 1;
        }
        state.in_flight = true;

        let frame = String::from_utf8_lossy(buf).into_owned();
        let reply: &[u8] = if frame.starts_with('e') {
            b"1 2\r"
        } else {
            b"OK\r"
        };
        state.pending.extend(reply);
        state.frames.push(frame);
        if let Some(tx) = &state.on_write {
            let _ = tx.send(());
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Read for InstrumentedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        // stretch the round trip so callers actually contend
        thread::sleep(Duration::from_micros(200));

        let mut state = self.state.lock().unwrap();
        match state.pending.pop_front() {
            Some(byte) => {
                if byte == b'\r' {
                    state.in_flight = false;
                }
                buf[0] = byte;
                Ok(1)
            }
            None => Err(io::Error::new(ErrorKind::TimedOut, "timed out")),
        }
    }
}

fn client_for(stream: &InstrumentedStream) -> Arc<ProtocolClient> {
    let channel = SerialChannel::from_stream(SerialEndpoint::default(), Box::new(stream.clone()));
    Arc::new(ProtocolClient::new(channel, false))
}

#[test]
fn concurrent_commands_never_interleave() {
    let stream = InstrumentedStream::default();
    let client = client_for(&stream);

    let pwm_client = Arc::clone(&client);
    let pwm = thread::spawn(move || {
        for i in 0..50 {
            pwm_client.set_pwm(i, -i).unwrap();
        }
    });

    let poll_client = Arc::clone(&client);
    let poll = thread::spawn(move || {
        for _ in 0..50 {
            assert_eq!(poll_client.read_encoders(), Some((1, 2)));
        }
    });

    pwm.join().unwrap();
    poll.join().unwrap();

    let state = stream.state.lock().unwrap();
    assert_eq!(state.violations, 0);
    assert_eq!(state.frames.len(), 100);
    assert!(!state.in_flight);
    assert_eq!(state.frames.iter().filter(|f| f.as_str() == "e\r").count(), 50);
}

#[test]
fn close_waits_for_in_flight_command() {
    let stream = InstrumentedStream::default();
    let (tx, rx) = mpsc::channel();
    stream.state.lock().unwrap().on_write = Some(tx);
    let client = client_for(&stream);

    let poll_client = Arc::clone(&client);
    let poll = thread::spawn(move || poll_client.read_encoders());

    // the frame is on the wire; close must wait for the reply
    rx.recv_timeout(Duration::from_secs(5)).unwrap();
    client.close();

    assert_eq!(poll.join().unwrap(), Some((1, 2)));
    assert!(matches!(
        client.set_pwm(0, 0),
        Err(ProtocolError::Channel(ChannelError::Closed))
    ));
    assert_eq!(client.read_encoders(), None);
}
