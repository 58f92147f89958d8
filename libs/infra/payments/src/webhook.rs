// [libs/infra/payments/src/webhook.rs]
/*!
 * Verificación de firma de webhooks, estilo `Stripe-Signature`: HMAC-SHA256
 * sobre `"{timestamp}.{raw_body}"` con el secreto compartido del endpoint.
 * Pura, sin I/O, para poder probarla sin levantar un servidor.
 */

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Verifica que `signature_hex` sea la firma HMAC-SHA256 esperada del
/// mensaje `"{timestamp}.{raw_body}"` bajo `webhook_secret`. Usa
/// comparación en tiempo constante vía `ct_eq` de dentro de `hmac`.
pub fn verify_webhook_signature(
    raw_body: &[u8],
    timestamp: &str,
    signature_hex: &str,
    webhook_secret: &str,
) -> bool {
    let Ok(mut mac) = HmacSha256::new_from_slice(webhook_secret.as_bytes()) else {
        return false;
    };
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(raw_body);

    let Ok(provided_signature) = hex::decode(signature_hex) else {
        return false;
    };

    mac.verify_slice(&provided_signature).is_ok()
}
