//! Wire shapes for the photo library API.

use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlbumResponse {
    #[serde(default)]
    pub album_name: String,
    #[serde(default)]
    pub assets: Vec<AssetResponse>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetResponse {
    pub id: String,
    pub original_file_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub id: String,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct PingResponse {
    pub res: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn album_response_parses_camel_case() {
        let json = r#"{
            "albumName": "Meural Input",
            "assets": [
                {"id": "a1", "originalFileName": "IMG_0001.jpg", "type": "IMAGE"}
            ]
        }"#;
        let album: AlbumResponse = serde_json::from_str(json).unwrap();
        assert_eq!(album.album_name, "Meural Input");
        assert_eq!(album.assets.len(), 1);
        assert_eq!(album.assets[0].id, "a1");
        assert_eq!(album.assets[0].original_file_name, "IMG_0001.jpg");
    }

    #[test]
    fn upload_response_tolerates_missing_status() {
        let up: UploadResponse = serde_json::from_str(r#"{"id": "new-id"}"#).unwrap();
        assert_eq!(up.id, "new-id");
        assert_eq!(up.status, "");
    }
}
