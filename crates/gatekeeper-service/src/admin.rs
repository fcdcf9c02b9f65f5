use anyhow::{anyhow, Context, Result};
use gatekeeper_core::SecureConfigStore;
use zeroize::Zeroizing;

pub(crate) const PASSWORD_ENV: &str = "GATEKEEPER_ADMIN_PASSWORD";
pub(crate) const NEW_PASSWORD_ENV: &str = "GATEKEEPER_NEW_PASSWORD";
const MIN_PASSWORD_LEN: usize = 8;

/// Require the administrator password before a mutation, if one is set.
pub(crate) fn authorize(store: &SecureConfigStore) -> Result<()> {
    if !store.is_password_set() {
        return Ok(());
    }
    let password = read_password(Some(PASSWORD_ENV), "Administrator password: ")?;
    if !store.verify_password(&password) {
        return Err(anyhow!("administrator password rejected"));
    }
    Ok(())
}

pub(crate) fn add_domain(store: &SecureConfigStore, domain: &str) -> Result<()> {
    authorize(store)?;
    let added = store.add_domain(domain)?;
    store.save().context("save configuration")?;
    if added {
        println!("added {}", domain.trim().to_lowercase());
    } else {
        println!("{} already allowed", domain.trim().to_lowercase());
    }
    Ok(())
}

pub(crate) fn remove_domain(store: &SecureConfigStore, domain: &str) -> Result<()> {
    authorize(store)?;
    if !store.remove_domain(domain)? {
        return Err(anyhow!("{} is not in the allow-list", domain.trim()));
    }
    store.save().context("save configuration")?;
    println!("removed {}", domain.trim().to_lowercase());
    Ok(())
}

pub(crate) fn list_domains(store: &SecureConfigStore) {
    for domain in store.get_whitelist().list() {
        println!("{domain}");
    }
}

pub(crate) fn set_password(store: &SecureConfigStore) -> Result<()> {
    authorize(store)?;
    let password = prompt_new_password()?;
    store.set_password(&password)?;
    store.save().context("save configuration")?;
    println!("administrator password updated");
    Ok(())
}

pub(crate) fn verify_password(store: &SecureConfigStore) -> Result<bool> {
    if !store.is_password_set() {
        return Err(anyhow!("no administrator password is set"));
    }
    let password = read_password(Some(PASSWORD_ENV), "Administrator password: ")?;
    Ok(store.verify_password(&password))
}

fn read_password(env: Option<&str>, prompt: &str) -> Result<Zeroizing<String>> {
    if let Some(Ok(pw)) = env.map(std::env::var) {
        if !pw.is_empty() {
            return Ok(Zeroizing::new(pw));
        }
    }
    let pw = rpassword::prompt_password(prompt).map_err(|e| anyhow!("password prompt: {e}"))?;
    Ok(Zeroizing::new(pw))
}

fn prompt_new_password() -> Result<Zeroizing<String>> {
    if let Ok(pw) = std::env::var(NEW_PASSWORD_ENV) {
        if !pw.is_empty() {
            return check_strength(Zeroizing::new(pw));
        }
    }
    let first = check_strength(read_password(None, "New administrator password: ")?)?;
    let second = Zeroizing::new(
        rpassword::prompt_password("Confirm password: ")
            .map_err(|e| anyhow!("password prompt: {e}"))?,
    );
    if *first != *second {
        return Err(anyhow!("passwords do not match"));
    }
    Ok(first)
}

fn check_strength(password: Zeroizing<String>) -> Result<Zeroizing<String>> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(anyhow!(
            "password too short; minimum {MIN_PASSWORD_LEN} characters"
        ));
    }
    Ok(password)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_passwords_rejected() {
        assert!(check_strength(Zeroizing::new("short".into())).is_err());
        assert!(check_strength(Zeroizing::new("Secret1!".into())).is_ok());
    }
}
