/// Frame identity and browse ordering.
///
/// Image datasets key frames by file name. Video datasets reuse file names
/// across videos (`0001.png` exists in every video), so their keys are
/// `video_id/file_name`.
use std::cmp::Ordering;

pub const FRAME_KEY_SEPARATOR: char = '/';

/// Version tag of the key scheme written into selection files.
/// Version 1 keyed every frame by file name alone.
pub const FRAME_KEY_SCHEME_VERSION: u32 = 2;

pub fn make_frame_key(video_id: Option<&str>, file_name: &str) -> String {
    match video_id {
        Some(video_id) => format!("{video_id}{FRAME_KEY_SEPARATOR}{file_name}"),
        None => file_name.to_string(),
    }
}

/// Split a key into `(video_id, file_name)`. Keys without a separator have no video.
pub fn split_frame_key(key: &str) -> (Option<&str>, &str) {
    match key.split_once(FRAME_KEY_SEPARATOR) {
        Some((video_id, file_name)) => (Some(video_id), file_name),
        None => (None, key),
    }
}

/// Natural ("human") string order: digit runs compare numerically and text
/// ignores case. Strings equal up to case fall back to a case-sensitive
/// comparison so the order stays total.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    alphanumeric_sort::compare_str(a.to_lowercase(), b.to_lowercase())
        .then_with(|| alphanumeric_sort::compare_str(a, b))
}

/// Browse order: video id first, then file name, both natural
pub fn compare_frames(a: (Option<&str>, &str), b: (Option<&str>, &str)) -> Ordering {
    let video_order = match (a.0, b.0) {
        (Some(va), Some(vb)) => natural_cmp(va, vb),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    video_order.then_with(|| natural_cmp(a.1, b.1))
}

pub fn natural_sort(keys: &mut [String]) {
    keys.sort_by(|a, b| natural_cmp(a, b));
}
