//! End-to-end install against an in-process host over loopback TCP.
//!
//! The host thread implements the responder side of the wire exchange:
//! LIST replies directly with the listing, GET_FILE runs the
//! ack/payload/response/ack sequence and serves ranges of an in-memory
//! container.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread;

use sidelink::{ContentStorage, Control, Destination, Installer};
use sidelink_pkg::{ContentId, ContentRecord, ContentType, MetaType};
use sidelink_proto::{
    Client, Command, FrameHeader, FrameType, TcpTransport, HEADER_LEN,
};

const TITLE_ID: u64 = 0x0100_0000_0001_0000;

fn cid(fill: u8) -> ContentId {
    ContentId([fill; 16])
}

fn build_meta_blob(records: &[ContentRecord]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&TITLE_ID.to_le_bytes());
    out.extend_from_slice(&0x2_0000u32.to_le_bytes());
    out.push(MetaType::Application.raw());
    out.push(0);
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(&(records.len() as u16).to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&[0u8; 4]);
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&[0u8; 16]);
    for rec in records {
        out.extend_from_slice(&[0u8; 32]);
        out.extend_from_slice(&rec.encode());
    }
    out
}

fn build_container(files: &[(String, Vec<u8>)]) -> Vec<u8> {
    let mut string_table = Vec::new();
    let mut name_offsets = Vec::new();
    for (name, _) in files {
        name_offsets.push(string_table.len() as u32);
        string_table.extend_from_slice(name.as_bytes());
        string_table.push(0);
    }

    let mut out = Vec::new();
    out.extend_from_slice(b"PFS0");
    out.extend_from_slice(&(files.len() as u32).to_le_bytes());
    out.extend_from_slice(&(string_table.len() as u32).to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());

    let mut data_offset = 0u64;
    for ((_, data), name_offset) in files.iter().zip(&name_offsets) {
        out.extend_from_slice(&data_offset.to_le_bytes());
        out.extend_from_slice(&(data.len() as u64).to_le_bytes());
        out.extend_from_slice(&name_offset.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        data_offset += data.len() as u64;
    }
    out.extend_from_slice(&string_table);
    for (_, data) in files {
        out.extend_from_slice(data);
    }
    out
}

/// Serves the protocol for one connection, then returns.
fn serve(listener: TcpListener, files: HashMap<String, Vec<u8>>) {
    let (mut stream, _addr) = listener.accept().expect("accept");
    while let Ok(header) = read_header(&mut stream) {
        match header.command {
            c if c == Command::List as u32 => {
                let body: Vec<u8> = files
                    .iter()
                    .map(|(name, data)| format!("{name}|{}", data.len()))
                    .collect::<Vec<_>>()
                    .join("\n")
                    .into_bytes();
                write_header(&mut stream, FrameType::Response, Command::List, body.len());
                let _ack = read_header(&mut stream).expect("list ack");
                stream.write_all(&body).expect("list body");
            }
            c if c == Command::GetFile as u32 => {
                write_header(&mut stream, FrameType::Ack, Command::GetFile, 0);
                let mut body = vec![0u8; header.length as usize];
                stream.read_exact(&mut body).expect("request body");

                let range_size = u32::from_le_bytes(body[0..4].try_into().unwrap()) as usize;
                let offset = u64::from_le_bytes(body[4..12].try_into().unwrap()) as usize;
                let name_len = u32::from_le_bytes(body[12..16].try_into().unwrap()) as usize;
                let name = String::from_utf8(body[16..16 + name_len].to_vec()).unwrap();

                let data = files.get(&name).expect("unknown file requested");
                let end = data.len().min(offset.saturating_add(range_size));
                let slice = if offset >= data.len() { &[][..] } else { &data[offset..end] };

                write_header(&mut stream, FrameType::Response, Command::GetFile, slice.len());
                let _ack = read_header(&mut stream).expect("response ack");
                if !slice.is_empty() {
                    stream.write_all(slice).expect("file data");
                }
            }
            c if c == Command::Exit as u32 => return,
            other => panic!("unexpected command {other}"),
        }
    }
}

fn read_header(stream: &mut TcpStream) -> std::io::Result<FrameHeader> {
    let mut buf = [0u8; HEADER_LEN];
    stream.read_exact(&mut buf)?;
    FrameHeader::decode(&buf).map_err(std::io::Error::other)
}

fn write_header(stream: &mut TcpStream, ty: FrameType, command: Command, length: usize) {
    let header = FrameHeader::new(ty, command, u32::try_from(length).unwrap());
    stream.write_all(&header.encode()).expect("header");
}

fn start_host(files: HashMap<String, Vec<u8>>) -> (SocketAddr, thread::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    let handle = thread::spawn(move || serve(listener, files));
    (addr, handle)
}

#[test]
fn install_streams_a_package_end_to_end() {
    let program_data: Vec<u8> = (0..900_000u32).map(|i| (i % 251) as u8).collect();
    let control_data = vec![0x77u8; 4096];
    let records = [
        ContentRecord {
            id: cid(0x11),
            size: program_data.len() as u64,
            ty: ContentType::Program,
            attr: 0,
            id_offset: 0,
        },
        ContentRecord {
            id: cid(0x22),
            size: control_data.len() as u64,
            ty: ContentType::Control,
            attr: 0,
            id_offset: 0,
        },
    ];
    let blob = build_meta_blob(&records);
    let container = build_container(&[
        (format!("{}.cnmt.nca", cid(0xEE)), blob),
        (format!("{}.nca", cid(0x11)), program_data.clone()),
        (format!("{}.nca", cid(0x22)), control_data.clone()),
    ]);
    let container_len = container.len() as u64;

    let (addr, host) = start_host(HashMap::from([("game.nsp".to_owned(), container)]));

    let dir = tempfile::tempdir().unwrap();
    let mut dest = Destination::open(dir.path()).unwrap();

    // The listing is how a real session learns the package size.
    let mut transport = TcpTransport::connect(addr).unwrap();
    let listing = Client::new(&mut transport).list().unwrap();
    assert_eq!(listing.len(), 1);
    assert_eq!(listing[0].name, "game.nsp");
    assert_eq!(listing[0].size, container_len);

    let mut progress_calls = 0u32;
    let report = Installer::new(&mut dest.storage, &mut dest.db, &mut dest.registry)
        .with_tickets(&mut dest.tickets)
        .install(&mut transport, "game.nsp", container_len, |done, total| {
            progress_calls += 1;
            assert!(total == 0 || done >= 1);
            Control::Continue
        })
        .unwrap();

    assert_eq!(report.contents_installed, 2);
    assert_eq!(
        report.total_bytes,
        (program_data.len() + control_data.len()) as u64
    );
    assert!(progress_calls >= 3);

    // Every content item is registered and byte-identical.
    let program_path = dest.storage.resolve(&cid(0x11)).unwrap();
    assert_eq!(std::fs::read(program_path).unwrap(), program_data);
    let control_path = dest.storage.resolve(&cid(0x22)).unwrap();
    assert_eq!(std::fs::read(control_path).unwrap(), control_data);

    // The metadata blob reached the database and the registry.
    let keys = dest.db.keys().unwrap();
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0].id, TITLE_ID);
    let titles = dest.registry.records().unwrap();
    assert_eq!(titles.len(), 1);
    assert_eq!(titles[0].base_title_id, TITLE_ID);

    // Tell the host to stop so the thread joins.
    Client::new(&mut transport).exit().unwrap();
    host.join().unwrap();
}

#[test]
fn range_reads_past_end_of_data_terminate_cleanly() {
    let payload = vec![0x5Au8; 10_000];
    let (addr, host) = start_host(HashMap::from([("blob.bin".to_owned(), payload.clone())]));

    let mut transport = TcpTransport::connect(addr).unwrap();
    let mut client = Client::new(&mut transport);

    // Drain the file with a read loop that only stops on a zero-length
    // response, the way a size-less legacy transfer runs.
    let mut fetched = Vec::new();
    let mut buf = vec![0u8; 4096];
    let mut offset = 0u64;
    loop {
        let n = client.read_range("blob.bin", offset, &mut buf).unwrap();
        if n == 0 {
            break;
        }
        fetched.extend_from_slice(&buf[..n]);
        offset += n as u64;
    }
    assert_eq!(fetched, payload);

    client.exit().unwrap();
    host.join().unwrap();
}
