use std::net::UdpSocket;

use super::WorkloadArgs;
use crate::ffi;
use crate::registry::{Class, Descriptor, Hooks, VerifyMode};
use crate::status::ExitCode;

const DGRAM_LEN: usize = 1024;

pub(crate) fn descriptor() -> Descriptor {
    Descriptor {
        id: 7,
        name: "udp",
        class: Class::NETWORK.union(Class::OS),
        verify: VerifyMode::Optional,
        short_opt: None,
        hooks: Hooks {
            supported: Some(supported),
            ..Hooks::default()
        },
        opt_setters: &[],
        workload: stress_udp,
        help: "start N workers bouncing datagrams off the loopback",
    }
}

fn supported() -> Result<(), &'static str> {
    UdpSocket::bind(("127.0.0.1", 0))
        .map(|_| ())
        .map_err(|_| "cannot bind a loopback datagram socket")
}

/// Loopback echo: each worker owns a sender/receiver socket pair bound
/// to ephemeral ports. One bogo-op per datagram round trip.
fn stress_udp(args: &mut WorkloadArgs) -> ExitCode {
    let (tx, rx) = match (
        UdpSocket::bind(("127.0.0.1", 0)),
        UdpSocket::bind(("127.0.0.1", 0)),
    ) {
        (Ok(tx), Ok(rx)) => (tx, rx),
        _ => return ExitCode::NoResource,
    };
    let target = match rx.local_addr() {
        Ok(addr) => addr,
        Err(_) => return ExitCode::NoResource,
    };

    let mut out = [0u8; DGRAM_LEN];
    let mut inp = [0u8; DGRAM_LEN];

    let start = ffi::now();
    args.ci.counter_ready = true;
    while args.keep_going() {
        out[0] = args.ci.counter as u8;
        out[DGRAM_LEN - 1] = (args.ci.counter >> 8) as u8;
        if tx.send_to(&out, target).is_err() {
            continue;
        }
        let got = match rx.recv(&mut inp) {
            Ok(got) => got,
            // EINTR from the shutdown alarm lands here.
            Err(_) => continue,
        };
        if args.verify
            && (got != DGRAM_LEN || inp[0] != out[0] || inp[DGRAM_LEN - 1] != out[DGRAM_LEN - 1])
        {
            return ExitCode::NotSuccess;
        }
        args.bump();
    }

    let elapsed = ffi::now() - start;
    if elapsed > 0.0 {
        args.add_metric("datagrams per second", args.ci.counter as f64 / elapsed);
    }
    args.ci.run_ok = true;
    ExitCode::Success
}
