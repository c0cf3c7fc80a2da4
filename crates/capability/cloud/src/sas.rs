use crate::CloudError;
use base64::{Engine as _, engine::general_purpose};
use hmac::{Hmac, Mac};
use sha2::Sha256;

/// 生成 SharedAccessSignature。
///
/// 签名内容为 `urlencode(resource_uri) + "\n" + expiry`，密钥为 base64 编码的设备共享密钥。
pub fn generate_sas_token(
    resource_uri: &str,
    shared_access_key: &str,
    expiry_epoch_secs: u64,
) -> Result<String, CloudError> {
    let key = general_purpose::STANDARD
        .decode(shared_access_key)
        .map_err(|err| CloudError::Token(format!("shared access key is not base64: {}", err)))?;
    let encoded_resource = urlencoding::encode(resource_uri);
    let string_to_sign = format!("{}\n{}", encoded_resource, expiry_epoch_secs);

    let mut mac = Hmac::<Sha256>::new_from_slice(&key)
        .map_err(|err| CloudError::Token(err.to_string()))?;
    mac.update(string_to_sign.as_bytes());
    let signature = general_purpose::STANDARD.encode(mac.finalize().into_bytes());

    Ok(format!(
        "SharedAccessSignature sr={}&sig={}&se={}",
        encoded_resource,
        urlencoding::encode(&signature),
        expiry_epoch_secs
    ))
}
