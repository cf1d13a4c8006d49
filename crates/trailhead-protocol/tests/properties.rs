//! Property-style checks for the line codec over a spread of hand-built
//! inputs: every packet kind, awkward item contents, and mangled lines.

use trailhead_protocol::{
    Codec, GameData, GameDataField, LineCodec, Packet, PacketType, PlayerId,
    ServerInfo,
};

/// Item strings chosen to stress the offset table.
const AWKWARD: [&str; 8] = [
    "",
    "|",
    "||",
    "a|b|c",
    "0.5|3|1|1|0|x",
    "Pokémon",
    "🎉|🎉",
    "trailing|",
];

fn sample_packets() -> Vec<Packet> {
    let mut packets = vec![
        Packet::ping(-1),
        Packet::id(PlayerId(1)),
        Packet::create_player(PlayerId(2)),
        Packet::destroy_player(PlayerId(3)),
        Packet::server_close("bye"),
        ServerInfo {
            player_count: 0,
            max_players: 20,
            name: "srv".into(),
            message: "".into(),
            player_names: vec![],
        }
        .to_packet(),
    ];
    for item in AWKWARD {
        packets.push(Packet::chat(4, item));
        packets.push(Packet::kicked(item));
        packets.push(Packet::gamestate(9, item));
        for other in AWKWARD {
            packets.push(Packet::private_message(2, item, other));
        }
        let data = GameData::default()
            .with(GameDataField::Name, item)
            .with(GameDataField::Position, item)
            .with(GameDataField::PokemonFacing, item);
        packets.push(data.to_packet(-1));
    }
    let battle = Packet::new(
        PacketType::BattleOffer,
        5,
        AWKWARD.iter().map(|s| s.to_string()).collect(),
    )
    .expect("any arity");
    packets.push(battle);
    packets
}

#[test]
fn test_decode_of_encode_is_identity() {
    let codec = LineCodec;
    for packet in sample_packets() {
        let line = codec.encode(&packet);
        let decoded = codec.decode(&line);
        assert_eq!(decoded.as_ref(), Ok(&packet), "line: {line}");
    }
}

#[test]
fn test_encode_of_decode_is_byte_exact() {
    let codec = LineCodec;
    for packet in sample_packets() {
        let line = codec.encode(&packet);
        let again = codec.encode(&codec.decode(&line).expect("decodes"));
        assert_eq!(again, line);
    }
}

#[test]
fn test_every_prefix_of_a_valid_line_is_rejected_or_exact() {
    // Truncating a line must never panic, and must never produce a
    // packet that re-encodes to something other than the truncated line.
    let codec = LineCodec;
    for packet in sample_packets() {
        let line = codec.encode(&packet);
        for (cut, _) in line.char_indices() {
            let prefix = &line[..cut];
            if let Ok(p) = codec.decode(prefix) {
                assert_eq!(codec.encode(&p), prefix);
            }
        }
    }
}

#[test]
fn test_wrong_version_is_rejected_for_every_type() {
    let codec = LineCodec;
    for packet in sample_packets() {
        let line = codec.encode(&packet);
        let mangled = line.replacen("0.5", "0.6", 1);
        assert!(codec.decode(&mangled).is_err(), "{mangled}");
    }
}
