use std::path::PathBuf;

/// デバイス指定をパスに変換する
///
/// 0以上の整数は`/dev/videoN`とみなし、それ以外はパスとしてそのまま使う
pub fn device_path(selector: &str) -> PathBuf {
    match selector.parse::<u32>() {
        Ok(index) => PathBuf::from(format!("/dev/video{index}")),
        Err(_) => PathBuf::from(selector),
    }
}
