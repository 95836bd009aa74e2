//! Module implement cluster pool lookup and the routing primitive.
//!
//! A pool is a replica set of servers owning an identical set of series.
//! Which pool owns a series is a pure function of the series name, the sum
//! of its bytes indexes a fixed 64 Ki lookup table. Building the table is
//! a cluster concern and happens elsewhere, here it is consumed as-is.

use rand::{rngs::SmallRng, Rng, SeedableRng};

use std::time::Duration;

use crate::{Error, Result};

/// Number of slots in a pool lookup table.
pub const LOOKUP_SZ: usize = 65536;

pub const SERVER_CONNECTED: u8 = 0x01;
pub const SERVER_AUTHENTICATED: u8 = 0x02;
pub const SERVER_BUSY: u8 = 0x04;

// sum of the name bytes, wrapping, same for terminated and raw names.
fn sn(data: &[u8]) -> u32 {
    data.iter().fold(0_u32, |n, b| n.wrapping_add(*b as u32))
}

/// The name to pool-id map, a fixed table of `u16` pool ids.
pub struct Lookup(Vec<u16>);

impl Lookup {
    pub fn new(table: Vec<u16>) -> Result<Lookup> {
        if table.len() != LOOKUP_SZ {
            err_at!(InvalidInput, msg: "lookup table of {} slots", table.len())?;
        }
        Ok(Lookup(table))
    }

    /// Pool id owning `name`.
    pub fn pool_id(&self, name: &str) -> u16 {
        self.pool_id_raw(name.as_bytes())
    }

    /// Same lookup over a raw, not NUL terminated, byte string.
    pub fn pool_id_raw(&self, data: &[u8]) -> u16 {
        self.0[(sn(data) as usize) % LOOKUP_SZ]
    }
}

pub struct Server {
    pub name: String,
    pub flags: u8,
    // per-connection package id, rewritten into every outgoing package.
    next_pid: u16,
}

impl Server {
    pub fn new(name: &str) -> Server {
        Server {
            name: name.to_string(),
            flags: 0,
            next_pid: 0,
        }
    }

    /// Connected and authenticated.
    pub fn is_online(&self) -> bool {
        (self.flags & (SERVER_CONNECTED | SERVER_AUTHENTICATED))
            == (SERVER_CONNECTED | SERVER_AUTHENTICATED)
    }

    /// Online and not busy, the bar for routing a package here.
    pub fn is_available(&self) -> bool {
        self.is_online() && (self.flags & SERVER_BUSY) == 0
    }

    fn new_pid(&mut self) -> u16 {
        let pid = self.next_pid;
        self.next_pid = self.next_pid.wrapping_add(1);
        pid
    }
}

/// Package handed to the transport. `pid` is rewritten with a freshly
/// allocated per-connection id on every send.
#[derive(Clone, Debug, PartialEq)]
pub struct Pkg {
    pub pid: u16,
    pub tp: u8,
    pub data: Vec<u8>,
}

/// How a routed package completed, delivered to the promise callback.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Status {
    Ok,
    Timeout,
    TransportError,
    Cancelled,
}

/// Promise callback, fires exactly once, on the engine loop.
pub type PromiseCb = Box<dyn FnOnce(Status, Option<Pkg>)>;

/// The opaque wire primitive. The engine never looks past this seam, the
/// host decides how bytes move and completes the promise on the loop.
pub trait Transport {
    fn send_pkg(&mut self, server: &str, pkg: Pkg, timeout: Duration, cb: PromiseCb);
}

pub struct Pool {
    pub pid: u16,
    pub servers: Vec<Server>,
    rng: SmallRng,
}

impl Pool {
    pub fn new(pid: u16, servers: Vec<Server>) -> Pool {
        Pool {
            pid,
            servers,
            rng: SmallRng::from_entropy(),
        }
    }

    /// At least one server is connected and authenticated.
    pub fn is_online(&self) -> bool {
        self.servers.iter().any(|s| s.is_online())
    }

    /// At least one server can take a package right now.
    pub fn is_available(&self) -> bool {
        self.servers.iter().any(|s| s.is_available())
    }

    /// Send `pkg` to one available server, picked uniformly at random as
    /// the light-weight load balancer. With no server available the
    /// promise callback is NOT invoked and the caller gets the error.
    pub fn send_pkg<T>(
        &mut self,
        transport: &mut T,
        mut pkg: Pkg,
        timeout: Duration,
        cb: PromiseCb,
    ) -> Result<()>
    where
        T: Transport,
    {
        let avail: Vec<usize> = self
            .servers
            .iter()
            .enumerate()
            .filter_map(|(i, s)| if s.is_available() { Some(i) } else { None })
            .collect();

        match avail.len() {
            0 => err_at!(NotAvailable, msg: "pool {} has no available server", self.pid),
            n => {
                let server = &mut self.servers[avail[self.rng.gen::<usize>() % n]];
                pkg.pid = server.new_pid();
                transport.send_pkg(&server.name, pkg, timeout, cb);
                Ok(())
            }
        }
    }
}

/// The cluster view one replica carries, lookup table plus pool states.
pub struct Pools {
    pub lookup: Lookup,
    pub pools: Vec<Pool>,
}

impl Pools {
    pub fn new(lookup: Lookup, pools: Vec<Pool>) -> Pools {
        Pools { lookup, pools }
    }

    pub fn pool_id(&self, name: &str) -> u16 {
        self.lookup.pool_id(name)
    }

    pub fn get_mut(&mut self, pid: u16) -> Option<&mut Pool> {
        self.pools.iter_mut().find(|p| p.pid == pid)
    }
}

#[cfg(test)]
#[path = "pool_test.rs"]
mod pool_test;
