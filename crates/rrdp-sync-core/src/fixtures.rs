//! Document builders shared by unit tests.

use crate::hash::sha256_hex;
use rrdp_sync_proto::encode_payload;

pub const NOTIFICATION_URL: &str = "https://rrdp.example.net/notification.xml";

pub fn snapshot_url(serial: u64) -> String {
    format!("https://rrdp.example.net/{serial}/snapshot.xml")
}

pub fn delta_url(serial: u64) -> String {
    format!("https://rrdp.example.net/{serial}/delta.xml")
}

pub fn object_uri(name: &str) -> String {
    format!("rsync://rpki.example.net/repo/{name}")
}

pub fn notification_xml(
    session: &str,
    serial: u64,
    snapshot_hash: &str,
    deltas: &[(u64, String)],
) -> String {
    let mut xml = format!(
        r#"<notification xmlns="http://www.ripe.net/rpki/rrdp" version="1" session_id="{session}" serial="{serial}">
  <snapshot uri="{}" hash="{snapshot_hash}"/>
"#,
        snapshot_url(serial)
    );
    for (delta_serial, hash) in deltas {
        xml.push_str(&format!(
            "  <delta serial=\"{delta_serial}\" uri=\"{}\" hash=\"{hash}\"/>\n",
            delta_url(*delta_serial)
        ));
    }
    xml.push_str("</notification>\n");
    xml
}

pub fn snapshot_xml(session: &str, serial: u64, objects: &[(&str, &[u8])]) -> String {
    let mut xml = format!(
        r#"<snapshot xmlns="http://www.ripe.net/rpki/rrdp" version="1" session_id="{session}" serial="{serial}">
"#
    );
    for (name, payload) in objects {
        xml.push_str(&format!(
            "  <publish uri=\"{}\">{}</publish>\n",
            object_uri(name),
            encode_payload(payload)
        ));
    }
    xml.push_str("</snapshot>\n");
    xml
}

pub fn delta_xml(
    session: &str,
    serial: u64,
    publishes: &[(&str, &[u8])],
    withdraws: &[&str],
) -> String {
    let mut xml = format!(
        r#"<delta xmlns="http://www.ripe.net/rpki/rrdp" version="1" session_id="{session}" serial="{serial}">
"#
    );
    for name in withdraws {
        xml.push_str(&format!(
            "  <withdraw uri=\"{}\" hash=\"{}\"/>\n",
            object_uri(name),
            sha256_hex(name.as_bytes())
        ));
    }
    for (name, payload) in publishes {
        xml.push_str(&format!(
            "  <publish uri=\"{}\">{}</publish>\n",
            object_uri(name),
            encode_payload(payload)
        ));
    }
    xml.push_str("</delta>\n");
    xml
}

/// A repository with session `session`, a snapshot at `serial` holding
/// `objects`, and the given deltas, all served from `fetcher`.
pub struct Repository<'a> {
    pub session: &'a str,
    pub serial: u64,
    pub objects: Vec<(&'a str, &'a [u8])>,
    pub deltas: Vec<(u64, String)>,
}

impl Repository<'_> {
    pub fn serve(&self, fetcher: &crate::StaticFetcher) {
        let snapshot = snapshot_xml(self.session, self.serial, &self.objects);
        let deltas: Vec<(u64, String)> = self
            .deltas
            .iter()
            .map(|(serial, xml)| {
                fetcher.insert(delta_url(*serial), xml.clone().into_bytes());
                (*serial, sha256_hex(xml.as_bytes()))
            })
            .collect();
        fetcher.insert(
            NOTIFICATION_URL,
            notification_xml(self.session, self.serial, &sha256_hex(snapshot.as_bytes()), &deltas)
                .into_bytes(),
        );
        fetcher.insert(snapshot_url(self.serial), snapshot.into_bytes());
    }
}
