// SPDX-License-Identifier: Apache-2.0

// Broadcast a DHCPDISCOVER on the given interface and print the first
// reply that passes identity verification. Needs CAP_NET_RAW:
//     sudo -E cargo run --example discover -- eth1

use rand::Rng;

use dhcplink::{
    DhcpEventPool, DhcpV4Config, DhcpV4Connection, ARP_HW_TYPE_ETHERNET,
};

const POLL_WAIT_TIME: u32 = 5;
const BROADCAST_MAC: [u8; 6] = [0xff; 6];

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let iface_name = std::env::args()
        .nth(1)
        .expect("Usage: discover <interface>");

    let iface_index = nix::net::if_::if_nametoindex(iface_name.as_str())?;
    let mac = read_mac(&iface_name);

    let mut config = DhcpV4Config::new(iface_index);
    config.set_hwaddr(ARP_HW_TYPE_ETHERNET, &mac, &BROADCAST_MAC);

    let events = DhcpEventPool::new()?;
    let mut conn = DhcpV4Connection::new(config)?;
    conn.listen(&events)?;

    let xid: u32 = rand::thread_rng().gen();
    conn.discover(xid, 1)?;
    println!("DISCOVER sent on {iface_name} with xid {xid:#x}");

    loop {
        for _ in events.poll(POLL_WAIT_TIME)? {
            if let Some(message) = conn.dispatch(&events)? {
                let header = message.header();
                println!(
                    "{} from {}: offered address {}",
                    message
                        .message_type()
                        .map_or("<no type>".to_string(), |t| t.to_string()),
                    header.siaddr,
                    header.yiaddr,
                );
                conn.close(&events);
                return Ok(());
            }
        }
    }
}

fn read_mac(iface_name: &str) -> Vec<u8> {
    let raw =
        std::fs::read_to_string(format!("/sys/class/net/{iface_name}/address"))
            .expect("Failed to read interface MAC address");
    raw.trim()
        .split(':')
        .map(|b| u8::from_str_radix(b, 16).expect("Invalid MAC address"))
        .collect()
}
