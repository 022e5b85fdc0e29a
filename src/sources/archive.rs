use std::{
    io,
    path::{Path, PathBuf},
};
use serenity::model::id::GuildId;
use tokio::{fs, io::AsyncWriteExt};
use tracing::{debug, info};

/// Directorio donde se guardan los clips sintetizados.
///
/// Cada clip se escribe como `<guild>/<unix-millis>.wav` antes de
/// decodificarse. La carpeta de una guild se vacía cuando su sesión sale del
/// canal de voz; las demás guilds no se tocan.
#[derive(Debug, Clone)]
pub struct ClipArchive {
    dir: PathBuf,
}

impl ClipArchive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn guild_dir(&self, guild_id: GuildId) -> PathBuf {
        self.dir.join(guild_id.to_string())
    }

    /// Guarda un clip y devuelve su ruta. Dos clips en el mismo milisegundo
    /// reciben un sufijo.
    pub async fn store(&self, guild_id: GuildId, audio: &[u8]) -> io::Result<PathBuf> {
        let dir = self.guild_dir(guild_id);
        fs::create_dir_all(&dir).await?;

        let millis = chrono::Utc::now().timestamp_millis();
        let mut attempt = 0u32;
        loop {
            let name = if attempt == 0 {
                format!("{}.wav", millis)
            } else {
                format!("{}-{}.wav", millis, attempt)
            };
            let path = dir.join(name);

            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(mut file) => {
                    file.write_all(audio).await?;
                    file.flush().await?;
                    debug!("💾 Clip guardado en {}", path.display());
                    return Ok(path);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => return Err(e),
            }
        }
    }

    /// Borra los clips de una guild. Una carpeta inexistente cuenta como
    /// vacía.
    pub async fn purge(&self, guild_id: GuildId) -> io::Result<usize> {
        let dir = self.guild_dir(guild_id);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                fs::remove_file(entry.path()).await?;
                removed += 1;
            }
        }

        if removed > 0 {
            info!("🧹 {} clips eliminados de {}", removed, dir.display());
        }
        Ok(removed)
    }
}
