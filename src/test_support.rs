use serde_json::{json, Value};

use crate::model::Track;

pub(crate) fn track_json(id: &str, length: u64) -> Value {
    json!({
        "encoded": format!("enc-{id}"),
        "info": {
            "identifier": id,
            "isSeekable": true,
            "author": "Artist",
            "length": length,
            "isStream": false,
            "position": 0,
            "title": format!("Song {id}"),
            "uri": format!("https://example.com/{id}"),
            "artworkUrl": null,
            "isrc": null,
            "sourceName": "youtube"
        },
        "pluginInfo": {},
        "userData": {}
    })
}

pub(crate) fn track(id: &str, length: u64) -> Track {
    serde_json::from_value(track_json(id, length)).unwrap()
}
