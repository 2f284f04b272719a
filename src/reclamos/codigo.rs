use std::time::{SystemTime, UNIX_EPOCH};

const ALFABETO: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

fn seccion(slug: &str, largo: usize) -> String {
    slug.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .take(largo)
        .collect()
}

fn cola_base36(nanos: u128) -> String {
    let mut restante = nanos;
    let mut buf = [b'0'; 6];
    for b in buf.iter_mut().rev() {
        *b = ALFABETO[(restante % 36) as usize];
        restante /= 36;
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Codigo publico del reclamo: `YYYY-TENANT8[-SEDE4]-XXXXXX`. La cola se
/// deriva de los nanosegundos actuales; la restriccion UNIQUE de la tabla
/// es la autoridad final ante una colision.
pub fn generar(anio: i32, tenant_slug: &str, sede_slug: Option<&str>) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    generar_con_nanos(anio, tenant_slug, sede_slug, nanos)
}

fn generar_con_nanos(
    anio: i32,
    tenant_slug: &str,
    sede_slug: Option<&str>,
    nanos: u128,
) -> String {
    let mut codigo = format!("{}-{}", anio, seccion(tenant_slug, 8));
    if let Some(sede) = sede_slug {
        let parte = seccion(sede, 4);
        if !parte.is_empty() {
            codigo.push('-');
            codigo.push_str(&parte);
        }
    }
    codigo.push('-');
    codigo.push_str(&cola_base36(nanos));
    codigo
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;

    #[test]
    fn formato_con_sede() {
        let codigo = generar_con_nanos(2026, "pollos-regios", Some("miraflores"), 123_456_789);
        let re = Regex::new(r"^2026-POLLOSRE-MIRA-[0-9A-Z]{6}$").unwrap();
        assert!(re.is_match(&codigo), "codigo inesperado: {}", codigo);
    }

    #[test]
    fn formato_sin_sede() {
        let codigo = generar_con_nanos(2026, "acme", None, 42);
        let re = Regex::new(r"^2026-ACME-[0-9A-Z]{6}$").unwrap();
        assert!(re.is_match(&codigo), "codigo inesperado: {}", codigo);
    }

    #[test]
    fn cola_siempre_seis_caracteres() {
        assert_eq!(cola_base36(0), "000000");
        assert_eq!(cola_base36(35), "00000Z");
        assert_eq!(cola_base36(36), "000010");
        // solo sobreviven los ultimos 6 digitos base-36
        assert_eq!(cola_base36(u128::MAX).len(), 6);
    }

    #[test]
    fn nanos_distintos_dan_colas_distintas() {
        let a = generar_con_nanos(2026, "acme", None, 1_000_000_001);
        let b = generar_con_nanos(2026, "acme", None, 1_000_000_002);
        assert_ne!(a, b);
    }

    #[test]
    fn slug_con_guiones_se_compacta() {
        let codigo = generar_con_nanos(2026, "la-buena-mesa", Some("san-isidro"), 7);
        assert!(codigo.starts_with("2026-LABUENAM-SANI-"));
    }
}
