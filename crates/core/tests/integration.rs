//! Integration tests: full SETUP → PLAY → re-tune → TEARDOWN lifecycle
//! against a scripted SAT>IP server, in both transport modes.
//!
//! The test owns the poll loop, exactly like a production host: it asks
//! the session for a descriptor and timeout, calls `poll(2)`, and feeds
//! events or timer ticks back.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream, UdpSocket};
use std::sync::Arc;
use std::sync::mpsc::{Receiver, Sender, channel};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use satip::{
    RtspSession, RtspState, TsSink, TuningParams, TuningStore,
    config::{DeliverySystem, FecInner, Polarization},
};

#[derive(Default)]
struct CollectSink {
    data: Mutex<Vec<u8>>,
}

impl TsSink for CollectSink {
    fn write_ts(&self, payload: &[u8]) -> std::io::Result<()> {
        self.data.lock().extend_from_slice(payload);
        Ok(())
    }
}

fn tuning(freq_mhz: u32, pol: Polarization) -> TuningParams {
    TuningParams {
        src: 1,
        freq_mhz,
        pol,
        msys: DeliverySystem::Dvbs,
        sr: 22000,
        fec: Some(FecInner::F56),
    }
}

/// Drive the session until `until` holds or five seconds pass.
fn pump(session: &mut RtspSession, until: impl Fn(&RtspSession) -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if until(session) {
            return true;
        }
        let (fd, events) = session.poll_descriptor();
        let timeout = session.poll_timeout_ms().min(50);
        let mut fds = [libc::pollfd {
            fd,
            events,
            revents: 0,
        }];
        let ready = unsafe { libc::poll(fds.as_mut_ptr(), 1, timeout) };
        if ready > 0 && fds[0].revents != 0 {
            session.handle_events(fds[0].revents);
        } else {
            session.tick_timers();
        }
    }
    false
}

fn read_request(reader: &mut BufReader<TcpStream>) -> std::io::Result<String> {
    let mut request = String::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        request.push_str(&line);
        if line == "\r\n" {
            break;
        }
    }
    Ok(request)
}

fn header_value<'a>(request: &'a str, name: &str) -> Option<&'a str> {
    request
        .lines()
        .find_map(|line| line.strip_prefix(name))
        .map(str::trim)
}

fn rtp_datagram(sequence: u16, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; 12];
    out[0] = 2 << 6;
    out[1] = 33;
    out[2..4].copy_from_slice(&sequence.to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// A SAT>IP `SES1` RTCP APP packet carrying the given ASCII payload.
fn rtcp_app(payload: &str) -> Vec<u8> {
    let mut body = payload.as_bytes().to_vec();
    while body.len() % 4 != 0 {
        body.push(0);
    }
    let words = (16 + body.len()) / 4 - 1;
    let mut out = vec![0x80, 204, 0, 0];
    out[2..4].copy_from_slice(&(words as u16).to_be_bytes());
    out.extend_from_slice(&0x1234_5678u32.to_be_bytes());
    out.extend_from_slice(b"SES1");
    out.extend_from_slice(&0u16.to_be_bytes());
    out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    out.extend_from_slice(&body);
    out
}

fn interleaved(channel: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![b'$', channel];
    out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

const TELEMETRY: &str =
    "ver=1.0;src=1;tuner=1,230,1,14,11538,v,dvbs,qpsk,off,0.35,22000,56;pids=0,100";

fn respond_ok(writer: &mut TcpStream, cseq: &str, extra: &str) {
    let response = format!("RTSP/1.0 200 OK\r\nCSeq: {cseq}\r\n{extra}\r\n");
    writer.write_all(response.as_bytes()).unwrap();
}

/// Scripted server for UDP-data mode: answers the handshake, then injects
/// RTP and RTCP datagrams at the client_port advertised in SETUP.
fn udp_mock_server(listener: TcpListener, requests: Sender<String>) {
    let (stream, _) = listener.accept().unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let mut reader = BufReader::new(stream.try_clone().unwrap());
    let mut writer = stream;
    let mut client_rtp_port: Option<u16> = None;

    loop {
        let request = match read_request(&mut reader) {
            Ok(r) if !r.is_empty() => r,
            _ => break,
        };
        let cseq = header_value(&request, "CSeq:").unwrap_or("0").to_string();
        let method = request.split_whitespace().next().unwrap_or("").to_string();
        requests.send(request.clone()).unwrap();

        match method.as_str() {
            "SETUP" => {
                let transport = header_value(&request, "Transport:").unwrap_or("");
                client_rtp_port = transport
                    .split(';')
                    .find_map(|p| p.strip_prefix("client_port="))
                    .and_then(|ports| ports.split('-').next())
                    .and_then(|p| p.parse().ok());
                respond_ok(
                    &mut writer,
                    &cseq,
                    &format!(
                        "Session: ABCD;timeout=60\r\nTransport: {transport};server_port=8000-8001\r\ncom.ses.streamID: 3\r\n"
                    ),
                );
            }
            "PLAY" => {
                respond_ok(&mut writer, &cseq, "Session: ABCD\r\n");
                if let Some(port) = client_rtp_port {
                    let media = UdpSocket::bind("127.0.0.1:0").unwrap();
                    media
                        .send_to(&rtp_datagram(100, b"UDPMEDIA"), ("127.0.0.1", port))
                        .unwrap();
                    media
                        .send_to(&rtcp_app(TELEMETRY), ("127.0.0.1", port + 1))
                        .unwrap();
                }
            }
            "OPTIONS" => respond_ok(&mut writer, &cseq, "Session: ABCD\r\n"),
            "TEARDOWN" => {
                respond_ok(&mut writer, &cseq, "Session: ABCD\r\n");
                break;
            }
            other => panic!("mock server got unexpected method {other}"),
        }
    }
}

#[test]
fn udp_full_lifecycle() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let (req_tx, req_rx): (Sender<String>, Receiver<String>) = channel();
    let server = thread::spawn(move || udp_mock_server(listener, req_tx));

    let store = Arc::new(TuningStore::new(false, 1));
    store.set_channel(tuning(11538, Polarization::Vertical));
    store.set_pids(vec![0, 100]);

    let sink = Arc::new(CollectSink::default());
    let mut session = RtspSession::new("127.0.0.1", port, store.clone(), sink.clone());

    assert!(
        pump(&mut session, |s| s.state() == RtspState::SessionTransmitting),
        "never reached SessionTransmitting, state: {:?}",
        session.state()
    );
    assert_eq!(session.session_id(), "ABCD");
    assert_eq!(session.stream_id(), 3);

    let setup = req_rx.recv_timeout(Duration::from_secs(1)).unwrap();
    assert!(setup.starts_with("SETUP rtsp://127.0.0.1"));
    assert!(setup.contains("?src=1&freq=11538&pol=v&msys=dvbs&sr=22000&fec=56&pids=0,100"));
    assert!(setup.contains("CSeq: 1\r\n"));
    let transport = header_value(&setup, "Transport:").unwrap();
    let rtp_port: u16 = transport
        .split(';')
        .find_map(|p| p.strip_prefix("client_port="))
        .and_then(|ports| ports.split('-').next())
        .and_then(|p| p.parse().ok())
        .expect("SETUP must advertise client_port");
    assert_eq!(rtp_port % 2, 0, "advertised RTP port must be even");

    let play = req_rx.recv_timeout(Duration::from_secs(1)).unwrap();
    assert!(play.starts_with("PLAY rtsp://127.0.0.1"));
    assert!(play.contains("stream=3"));
    assert!(play.contains("CSeq: 2\r\n"));
    assert!(play.contains("Session: ABCD\r\n"));

    // Keep-alive must be armed shortly below the 60s session timeout.
    let timeout_ms = session.poll_timeout_ms();
    assert!(
        (54_000..=55_000).contains(&timeout_ms),
        "keep-alive window, got {timeout_ms}"
    );

    // The datagrams the server injected at the advertised port must come
    // out of the sink and the signal monitor.
    assert!(
        pump(&mut session, |s| {
            !sink.data.lock().is_empty() && s.signal_status().has_lock
        }),
        "media or telemetry never arrived"
    );
    assert_eq!(&*sink.data.lock(), b"UDPMEDIA");
    let status = session.signal_status();
    assert_eq!(status.signal_strength, 230);
    assert_eq!(status.signal_quality, 14);

    // Channel change while transmitting: a new PLAY with the new query.
    store.set_channel(tuning(12000, Polarization::Horizontal));
    store.set_pids(vec![0, 200]);
    assert!(
        pump(&mut session, |s| s.state() == RtspState::SessionPlaying),
        "re-tune PLAY never sent"
    );
    assert!(
        pump(&mut session, |s| s.state() == RtspState::SessionTransmitting),
        "re-tune never completed"
    );
    let retune = req_rx.recv_timeout(Duration::from_secs(1)).unwrap();
    assert!(retune.starts_with("PLAY "));
    assert!(retune.contains("freq=12000"));
    assert!(retune.contains("pol=h"));
    assert!(retune.contains("CSeq: 3\r\n"));

    // Invalid channel: orderly TEARDOWN, then back to ConfigWaiting.
    store.clear_channel();
    assert!(
        pump(&mut session, |s| s.state() == RtspState::ConfigWaiting),
        "teardown never completed"
    );
    let teardown = req_rx.recv_timeout(Duration::from_secs(1)).unwrap();
    assert!(teardown.starts_with(&format!("TEARDOWN rtsp://127.0.0.1:{port}/stream=3 RTSP/1.0")));
    assert!(teardown.contains("CSeq: 4\r\n"));
    assert_eq!(session.poll_descriptor().0, -1);
    assert_eq!(session.session_id(), "");
    assert_eq!(session.stream_id(), -1);

    server.join().unwrap();
}

/// Scripted server for TCP-data mode: same handshake, then interleaved
/// media on the control connection, written in deliberately split pieces.
fn tcp_mock_server(listener: TcpListener, requests: Sender<String>) {
    let (stream, _) = listener.accept().unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let mut reader = BufReader::new(stream.try_clone().unwrap());
    let mut writer = stream;

    loop {
        let request = match read_request(&mut reader) {
            Ok(r) if !r.is_empty() => r,
            _ => break,
        };
        let cseq = header_value(&request, "CSeq:").unwrap_or("0").to_string();
        let method = request.split_whitespace().next().unwrap_or("").to_string();
        requests.send(request.clone()).unwrap();

        match method.as_str() {
            "SETUP" => respond_ok(
                &mut writer,
                &cseq,
                "Session: ABCD;timeout=60\r\nTransport: RTP/AVP/TCP;interleaved=0-1\r\ncom.ses.streamID: 1\r\n",
            ),
            "PLAY" => {
                respond_ok(&mut writer, &cseq, "Session: ABCD\r\n");

                // One RTP frame, split mid-payload to exercise reassembly.
                let frame = interleaved(0, &rtp_datagram(7, b"TCPMEDIA"));
                let (head, tail) = frame.split_at(6);
                writer.write_all(head).unwrap();
                writer.flush().unwrap();
                thread::sleep(Duration::from_millis(30));
                writer.write_all(tail).unwrap();

                // Telemetry on channel 1.
                writer
                    .write_all(&interleaved(1, &rtcp_app(TELEMETRY)))
                    .unwrap();
            }
            "OPTIONS" => respond_ok(&mut writer, &cseq, "Session: ABCD\r\n"),
            "TEARDOWN" => {
                respond_ok(&mut writer, &cseq, "Session: ABCD\r\n");
                break;
            }
            other => panic!("mock server got unexpected method {other}"),
        }
    }
}

#[test]
fn tcp_interleaved_lifecycle() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let (req_tx, req_rx): (Sender<String>, Receiver<String>) = channel();
    let server = thread::spawn(move || tcp_mock_server(listener, req_tx));

    let store = Arc::new(TuningStore::new(true, 1));
    store.set_channel(tuning(11538, Polarization::Vertical));
    store.set_pids(vec![0, 100]);

    let sink = Arc::new(CollectSink::default());
    let mut session = RtspSession::new("127.0.0.1", port, store.clone(), sink.clone());

    assert!(
        pump(&mut session, |s| s.state() == RtspState::SessionTransmitting),
        "never reached SessionTransmitting, state: {:?}",
        session.state()
    );

    let setup = req_rx.recv_timeout(Duration::from_secs(1)).unwrap();
    assert!(setup.contains("Transport: RTP/AVP/TCP;interleaved=0-1\r\n"));
    assert!(!setup.contains("client_port="));

    let play = req_rx.recv_timeout(Duration::from_secs(1)).unwrap();
    assert!(play.starts_with("PLAY rtsp://127.0.0.1"));
    assert!(play.contains("stream=1"));

    // The split interleaved frame and the telemetry must both surface.
    assert!(
        pump(&mut session, |s| {
            !sink.data.lock().is_empty() && s.signal_status().has_lock
        }),
        "interleaved media or telemetry never arrived"
    );
    assert_eq!(&*sink.data.lock(), b"TCPMEDIA");
    assert_eq!(session.signal_status().signal_strength, 230);

    store.clear_channel();
    assert!(
        pump(&mut session, |s| s.state() == RtspState::ConfigWaiting),
        "teardown never completed"
    );
    let teardown = req_rx.recv_timeout(Duration::from_secs(1)).unwrap();
    assert!(teardown.starts_with("TEARDOWN "));

    server.join().unwrap();
}
