use httpmock::prelude::*;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::thread;

use jpip::{JPIPClient, JPIPError, StreamKind, ViewWindowRequest};

fn client_for(server: &MockServer) -> JPIPClient {
    JPIPClient::new(&server.url("/jpip")).expect("client should build")
}

#[test]
fn test_open_channel() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET)
            .path("/jpip")
            .query_param("target", "sample.jp2")
            .query_param("fsiz", "640,480")
            .query_param("cnew", "http");
        then.status(200)
            .header("Content-Type", "image/jpt-stream")
            .header("JPIP-fsiz", "640,480")
            .header("JPIP-cnew", "cid=ABC123,path=jpip,transport=http")
            .body(vec![7u8; 2048]);
    });

    let mut client = client_for(&server);
    let stream = client
        .open_channel("sample.jp2", None, (640, 480), None)
        .unwrap();

    mock.assert();
    assert_eq!(stream.map(|s| s.len()), Some(2048));

    let session = client.session();
    assert_eq!(session.channel_id(), Some("ABC123"));
    assert_eq!(session.full_width(), Some(640));
    assert_eq!(session.full_height(), Some(480));
    assert_eq!(session.target(), Some("sample.jp2"));
    assert_eq!(session.stream_kind(), Some(StreamKind::JPT));
}

#[test]
fn test_region_on_existing_channel() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/jpip").query_param("cnew", "http");
        then.status(200)
            .header("JPIP-fsiz", "640,480")
            .header("JPIP-cnew", "cid=ABC123,path=jpip")
            .body(vec![1u8; 16]);
    });
    let region_mock = server.mock(|when, then| {
        when.method(GET)
            .path("/jpip")
            .query_param("cid", "ABC123")
            .query_param("roff", "10,20")
            .query_param("rsiz", "100,50");
        then.status(200)
            .header("JPIP-roff", "10,20")
            .header("JPIP-rsiz", "100,50")
            .body(vec![2u8; 32]);
    });

    let mut client = client_for(&server);
    client
        .open_channel("sample.jp2", None, (640, 480), None)
        .unwrap();
    let stream = client
        .request_region((640, 480), (10, 20), (100, 50))
        .unwrap();

    region_mock.assert();
    assert_eq!(stream, Some(vec![2u8; 32]));

    let session = client.session();
    assert_eq!(session.channel_id(), Some("ABC123"));
    assert_eq!(session.full_size(), Some((640, 480)));
    assert_eq!(session.region_offset(), Some((10, 20)));
    assert_eq!(session.region_size(), Some((100, 50)));
}

#[test]
fn test_second_channel_refused_before_network() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET).path("/jpip");
        then.status(200)
            .header("JPIP-cnew", "cid=C1,path=jpip")
            .body("x");
    });

    let mut client = client_for(&server);
    client
        .open_channel("sample.jp2", None, (64, 64), None)
        .unwrap();
    let before = client.session().clone();

    let result = client.open_channel("sample.jp2", None, (128, 128), None);
    assert!(matches!(result, Err(JPIPError::ChannelAlreadyOpen { .. })));
    assert_eq!(client.session(), &before);
    mock.assert_hits(1);
}

#[test]
fn test_malformed_header_keeps_body() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/jpip");
        then.status(200)
            .header("JPIP-fsiz", "six-forty,480")
            .header("JPIP-rsiz", "64,64")
            .header("JPIP-cnew", "cid=C7,path=jpip")
            .body(vec![9u8; 100]);
    });

    let mut client = client_for(&server);
    let stream = client
        .open_channel("sample.jp2", None, (640, 480), None)
        .unwrap();

    assert_eq!(stream.map(|s| s.len()), Some(100));
    assert_eq!(client.session().full_size(), None);
    assert_eq!(client.session().region_size(), Some((64, 64)));
    assert_eq!(client.session().channel_id(), Some("C7"));
}

#[test]
fn test_empty_body_is_no_new_data() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/jpip");
        then.status(200)
            .header("JPIP-tid", "tid=T42")
            .header("JPIP-fsiz", "32,32");
    });

    let mut client = client_for(&server);
    let request = ViewWindowRequest::new()
        .with_target("sample.jp2")
        .with_frame_size(32, 32);
    let stream = client.request_view_window(&request).unwrap();

    assert_eq!(stream, None);
    assert_eq!(client.session().transaction_id(), Some("T42"));
    assert_eq!(client.session().full_size(), Some((32, 32)));
}

#[test]
fn test_transaction_used_without_channel() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/jpip").query_param("target", "sample.jp2");
        then.status(200).header("JPIP-tid", "tid=T42").body("a");
    });
    let region_mock = server.mock(|when, then| {
        when.method(GET)
            .path("/jpip")
            .query_param("tid", "T42")
            .query_param("roff", "0,0");
        then.status(200).body("b");
    });

    let mut client = client_for(&server);
    client
        .request_view_window(&ViewWindowRequest::new().with_target("sample.jp2"))
        .unwrap();
    client
        .request_region((64, 64), (0, 0), (32, 32))
        .unwrap();
    region_mock.assert();
}

#[test]
fn test_region_without_channel_or_transaction() {
    let server = MockServer::start();
    let mut client = client_for(&server);
    assert!(matches!(
        client.request_region((64, 64), (0, 0), (32, 32)),
        Err(JPIPError::NoChannel)
    ));
    assert!(matches!(client.request_xml(), Err(JPIPError::NoChannel)));
}

#[test]
fn test_redirect_is_protocol_violation() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/jpip");
        then.status(302)
            .header("Location", "/elsewhere")
            .header("JPIP-cnew", "cid=R1,path=jpip");
    });

    let mut client = client_for(&server);
    let result = client.open_channel("sample.jp2", None, (64, 64), None);
    match result {
        Err(JPIPError::Redirect { status, location }) => {
            assert_eq!(status, 302);
            assert_eq!(location, "/elsewhere");
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(client.session().channel_id(), None);
}

#[test]
fn test_server_error_leaves_session() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/jpip");
        then.status(404).header("JPIP-fsiz", "640,480");
    });

    let mut client = client_for(&server);
    let result = client.open_channel("missing.jp2", None, (640, 480), None);
    assert!(matches!(result, Err(JPIPError::Http { status: 404, .. })));
    assert_eq!(client.session().full_size(), None);
    assert_eq!(client.session().target(), None);
}

#[test]
fn test_unreachable_host() {
    let mut client = JPIPClient::new("http://127.0.0.1:1/jpip").unwrap();
    let result = client.open_channel("sample.jp2", None, (640, 480), None);
    assert!(matches!(result, Err(JPIPError::Transport { .. })));
    assert_eq!(client.session().channel_id(), None);
}

#[test]
fn test_xml_and_close() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/jpip").query_param("cnew", "http");
        then.status(200)
            .header("JPIP-cnew", "cid=C1,path=jpip")
            .body("stream");
    });
    let xml_mock = server.mock(|when, then| {
        when.method(GET)
            .path("/jpip")
            .query_param("cid", "C1")
            .query_param("metareq", "[xml_]");
        then.status(200).body("meta");
    });
    let close_mock = server.mock(|when, then| {
        when.method(GET).path("/jpip").query_param("cclose", "C1");
        then.status(200);
    });

    let mut client = client_for(&server);
    client
        .open_channel("sample.jp2", None, (64, 64), Some(StreamKind::JPT))
        .unwrap();
    assert_eq!(client.request_xml().unwrap(), Some(b"meta".to_vec()));

    client.close_channel().unwrap();
    xml_mock.assert();
    close_mock.assert();
    assert_eq!(client.session().channel_id(), None);

    // nothing left to close
    client.close_channel().unwrap();
    close_mock.assert_hits(1);
}

#[test]
fn test_body_shorter_than_declared_is_done() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap();

    let peer = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            if line == "\r\n" || line.is_empty() {
                break;
            }
        }
        stream
            .write_all(
                b"HTTP/1.1 200 OK\r\n\
                  Content-Length: 100\r\n\
                  JPIP-fsiz: 640,480\r\n\
                  JPIP-cnew: cid=ABC,path=jpip\r\n\
                  \r\n",
            )
            .unwrap();
        stream.write_all(&[4u8; 10]).unwrap();
    });

    let mut client = JPIPClient::new(&format!("http://{}/jpip", address)).unwrap();
    let stream = client
        .open_channel("a.jp2", None, (640, 480), None)
        .unwrap();
    peer.join().unwrap();

    assert_eq!(stream, Some(vec![4u8; 10]));
    assert_eq!(client.session().channel_id(), Some("ABC"));
    assert_eq!(client.session().full_size(), Some((640, 480)));
}
