//! Presets shipped inside the binary.

pub(super) static BUNDLED: &[(&str, &str)] = &[
    ("helpers.yaml", include_str!("prebuilt/helpers.yaml")),
    ("tv_show.yaml", include_str!("prebuilt/tv_show.yaml")),
    ("music.yaml", include_str!("prebuilt/music.yaml")),
    ("music_videos.yaml", include_str!("prebuilt/music_videos.yaml")),
];
