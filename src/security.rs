use std::convert::TryInto;
use std::path::{Path, PathBuf};
use std::{env, fs};

const PASSWORD_SALT: &str = "password.salt";
const USER_AUTH_PUBLIC: &str = "user_auth.pem.pub";
const USER_AUTH_PRIVATE: &str = "user_auth.pem";

pub type Salt = [u8; 16];

#[derive(Debug, Clone)]
pub struct KeySet {
    pub public: Vec<u8>,
    pub private: Vec<u8>,
}

/// Secrets the server needs before it can hash a password or sign a
/// session cookie. Loaded once at startup and managed as Rocket state.
#[derive(Debug, Clone)]
pub struct Security {
    pub salt: Salt,
    pub jwt_keys: KeySet,
}

#[inline]
fn security_dir() -> PathBuf {
    PathBuf::from(env::var("SECURITY_DIR").unwrap_or("./security".to_string()))
}

impl Security {
    pub fn load() -> Security {
        let dir = security_dir();

        if cfg!(feature = "generate-security") {
            fs::create_dir_all(dir.clone())
                .expect("unable to create directory for storing security information");
        }

        Security {
            salt: load_salt(&dir),
            jwt_keys: load_jwt_keys(&dir),
        }
    }
}

fn load_salt(dir: &Path) -> Salt {
    tracing::info!("Loading password salt...");
    let salt: Option<Salt> = fs::read(dir.join(PASSWORD_SALT))
        .map(|s| s.try_into().ok())
        .ok()
        .flatten();

    if let Some(salt) = salt {
        tracing::info!("Salt found and loaded.");
        return salt;
    }

    tracing::info!("Salt not found in '{}'.", dir.join(PASSWORD_SALT).display());
    if !cfg!(feature = "generate-security") {
        panic!("No password salt available; provide one or enable 'generate-security'.");
    }

    tracing::info!("Generating a new password salt.");
    let salt: Salt = rand::random();
    fs::write(dir.join(PASSWORD_SALT), salt).expect("unable to write salt");

    salt
}

fn load_jwt_keys(dir: &Path) -> KeySet {
    tracing::info!("Loading JWT signing keys...");
    let public = fs::read(dir.join(USER_AUTH_PUBLIC)).ok();
    let private = fs::read(dir.join(USER_AUTH_PRIVATE)).ok();

    match (public, private) {
        (Some(public), Some(private)) => {
            tracing::info!("Loaded JWT keys.");
            KeySet { public, private }
        }
        #[cfg(feature = "generate-security")]
        _ => generate_jwt_keys(dir),
        #[cfg(not(feature = "generate-security"))]
        _ => {
            panic!("Unable to load private and/or public user auth key(s).");
        }
    }
}

#[cfg(feature = "generate-security")]
fn generate_jwt_keys(dir: &Path) -> KeySet {
    use rsa::pkcs1::{EncodeRsaPrivateKey, LineEnding};
    use rsa::pkcs8::EncodePublicKey;

    tracing::info!("Unable to load private and/or public user auth key(s). Generating a new pair.");

    tracing::info!("Generating a private RSA key. This will take a few minutes...");
    let mut rng = rand::thread_rng();
    let rsa_sk =
        rsa::RsaPrivateKey::new(&mut rng, 4096).expect("unable to generate a private RSA key");

    tracing::info!("Creating PS256 private key...");
    let private = rsa_sk
        .to_pkcs1_pem(LineEnding::LF)
        .expect("unable to generate PS256 private key")
        .to_string()
        .into_bytes();

    fs::write(dir.join(USER_AUTH_PRIVATE), private.as_slice())
        .expect("unable to write user auth private key");

    tracing::info!("Creating PS256 public key...");
    let public = rsa_sk
        .to_public_key()
        .to_public_key_der()
        .expect("unable to generate PS256 public key")
        .to_pem("JWT public key", LineEnding::LF)
        .expect("unable to create a valid UTF8 pem key")
        .into_bytes();

    fs::write(dir.join(USER_AUTH_PUBLIC), public.as_slice())
        .expect("unable to write user auth public key");

    tracing::info!("Done generating JWT keys.");

    KeySet { public, private }
}
