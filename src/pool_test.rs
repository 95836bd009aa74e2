use std::{cell::RefCell, rc::Rc};

use super::*;

#[test]
fn test_lookup_routing() {
    // table built so that "cpu.load" routes to pool 3.
    let n: u32 = "cpu.load".bytes().map(|b| b as u32).sum();
    let mut table = vec![0_u16; LOOKUP_SZ];
    table[(n as usize) % LOOKUP_SZ] = 3;

    let lookup = Lookup::new(table).unwrap();
    assert_eq!(lookup.pool_id("cpu.load"), 3);
    assert_eq!(lookup.pool_id("mem.free"), 0);
}

#[test]
fn test_sn_terminated_vs_raw() {
    let table: Vec<u16> = (0..LOOKUP_SZ).map(|i| (i % 7) as u16).collect();
    let lookup = Lookup::new(table).unwrap();

    for name in ["a", "cpu.load", "series-with-a-much-longer-name"] {
        assert_eq!(lookup.pool_id(name), lookup.pool_id_raw(name.as_bytes()));
    }
}

#[test]
fn test_lookup_validation() {
    assert!(Lookup::new(vec![0; 100]).is_err());
    assert!(Lookup::new(vec![0; LOOKUP_SZ]).is_ok());
}

#[test]
fn test_server_states() {
    let mut server = Server::new("s0");
    assert!(!server.is_online() && !server.is_available());

    server.flags = SERVER_CONNECTED;
    assert!(!server.is_online());

    server.flags = SERVER_CONNECTED | SERVER_AUTHENTICATED;
    assert!(server.is_online() && server.is_available());

    server.flags |= SERVER_BUSY;
    assert!(server.is_online() && !server.is_available());
}

struct MockTransport {
    sent: Vec<(String, Pkg)>,
}

impl Transport for MockTransport {
    fn send_pkg(&mut self, server: &str, pkg: Pkg, _timeout: Duration, cb: PromiseCb) {
        self.sent.push((server.to_string(), pkg.clone()));
        cb(Status::Ok, Some(pkg));
    }
}

#[test]
fn test_send_pkg() {
    let mut pool = Pool::new(1, vec![Server::new("s0"), Server::new("s1")]);
    pool.servers[1].flags = SERVER_CONNECTED | SERVER_AUTHENTICATED;

    let mut transport = MockTransport { sent: vec![] };
    let fired = Rc::new(RefCell::new(0));

    let pkg = Pkg {
        pid: 999,
        tp: 7,
        data: b"payload".to_vec(),
    };
    let f = Rc::clone(&fired);
    pool.send_pkg(
        &mut transport,
        pkg,
        Duration::from_millis(100),
        Box::new(move |status, reply| {
            assert_eq!(status, Status::Ok);
            assert!(reply.is_some());
            *f.borrow_mut() += 1;
        }),
    )
    .unwrap();

    assert_eq!(*fired.borrow(), 1);
    assert_eq!(transport.sent.len(), 1);
    // only the available server can be picked, pid is rewritten.
    assert_eq!(transport.sent[0].0, "s1");
    assert_eq!(transport.sent[0].1.pid, 0);

    // next send gets the next per-connection pid.
    let pkg = Pkg {
        pid: 999,
        tp: 7,
        data: vec![],
    };
    pool.send_pkg(
        &mut transport,
        pkg,
        Duration::from_millis(100),
        Box::new(|_, _| ()),
    )
    .unwrap();
    assert_eq!(transport.sent[1].1.pid, 1);
}

#[test]
fn test_send_pkg_not_available() {
    let mut pool = Pool::new(2, vec![Server::new("s0")]);
    pool.servers[0].flags = SERVER_CONNECTED; // online bar not met

    let mut transport = MockTransport { sent: vec![] };
    let fired = Rc::new(RefCell::new(false));

    let f = Rc::clone(&fired);
    let res = pool.send_pkg(
        &mut transport,
        Pkg { pid: 0, tp: 0, data: vec![] },
        Duration::from_millis(100),
        Box::new(move |_, _| *f.borrow_mut() = true),
    );

    match res {
        Err(Error::NotAvailable(_, _)) => (),
        res => panic!("unexpected {:?}", res.map(|_| ())),
    }
    // the callback must not fire when nothing was sent.
    assert!(!*fired.borrow());
    assert!(transport.sent.is_empty());
}

#[test]
fn test_pool_online_available() {
    let mut pool = Pool::new(0, vec![Server::new("s0"), Server::new("s1")]);
    assert!(!pool.is_online());
    assert!(!pool.is_available());

    pool.servers[0].flags = SERVER_CONNECTED | SERVER_AUTHENTICATED | SERVER_BUSY;
    assert!(pool.is_online());
    assert!(!pool.is_available());

    pool.servers[1].flags = SERVER_CONNECTED | SERVER_AUTHENTICATED;
    assert!(pool.is_available());
}
