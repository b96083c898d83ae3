//! Built-in channel list.

use radio_player::channel::Channel;

const STATIONS: &[(&str, &str)] = &[
    ("SlamFM", "https://stream.slam.nl/slam_mp3"),
    (
        "Veronica",
        "https://playerservices.streamtheworld.com/api/livestream-redirect/VERONICA",
    ),
    ("NPO Radio 1", "https://icecast.omroep.nl/radio1-bb-mp3"),
    ("NPO Radio 2", "https://icecast.omroep.nl/radio2-bb-mp3"),
    ("NPO 3FM", "https://icecast.omroep.nl/3fm-bb-mp3"),
    ("NPO FunX", "https://icecast.omroep.nl/funx-bb-mp3"),
];

pub fn registry() -> Vec<Channel> {
    STATIONS
        .iter()
        .map(|(name, url)| Channel::new(*name, *url))
        .collect()
}

/// Resolve a 1-based channel number or a case-insensitive name to an index.
pub fn find(channels: &[Channel], query: &str) -> Option<usize> {
    let query = query.trim();
    if query.is_empty() {
        return None;
    }
    if let Ok(n) = query.parse::<usize>() {
        return (1..=channels.len()).contains(&n).then(|| n - 1);
    }
    channels
        .iter()
        .position(|c| c.name.eq_ignore_ascii_case(query))
}

/// Print the list with the numbers [`find`] accepts.
pub fn print(channels: &[Channel]) {
    for (i, c) in channels.iter().enumerate() {
        println!("{:>2}: {}", i + 1, c.name);
    }
}
