//! Constantes del motor core.
//!
//! `ENGINE_VERSION` participa en el fingerprint de cada run: cambiarla
//! invalida la comparación de fingerprints entre versiones del motor aunque
//! la definición del pipeline no cambie.

/// Versión lógica del motor.
pub const ENGINE_VERSION: &str = "P1.0";

/// Exit code que un stage debe devolver para considerarse exitoso si la
/// definición no indica otro.
pub const DEFAULT_SUCCESS_CODE: i32 = 0;

/// Tope de texto de diagnóstico retenido por stage (stdout + stderr).
pub const DEFAULT_DIAGNOSTIC_CAP_BYTES: usize = 64 * 1024;

/// Capacidad del canal entre los lectores de stdout/stderr y el colector.
pub const DIAGNOSTIC_CHANNEL_CAPACITY: usize = 1024;

/// Prefijo del directorio de cada iteración dentro del namespace de un run.
pub const ITERATION_DIR_PREFIX: &str = "iter-";
