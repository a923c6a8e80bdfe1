use std::collections::HashMap;

/// A named mail template: a subject fallback and a plain-text body with
/// `{{key}}` placeholders.
pub struct Template {
    pub name: &'static str,
    pub body: &'static str,
}

const TEMPLATES: &[Template] = &[
    Template {
        name: "booking_confirmed",
        body: "Nouvelle réservation payée.\n\n\
               Client : {{name}}\n\
               Email : {{email}}\n\
               Téléphone : {{phone}}\n\
               Ville : {{city}}\n\
               Service : {{service}}\n\
               Date : {{date}}\n\
               Heure : {{time}}\n",
    },
    Template {
        name: "refund_alert",
        body: "Un paiement a été reçu mais la réservation n'a pas pu être honorée.\n\n\
               Réservation : #{{bookingId}}\n\
               Client : {{name}} ({{email}})\n\
               Date demandée : {{date}}\n\
               Motif : {{reason}}\n\n\
               Un remboursement doit être effectué manuellement.\n",
    },
    Template {
        name: "quote_received",
        body: "Nouvelle demande de devis.\n\n\
               Nom : {{name}}\n\
               Email : {{email}}\n\
               Téléphone : {{phone}}\n\
               Message :\n{{message}}\n",
    },
];

pub fn lookup(name: &str) -> Option<&'static Template> {
    TEMPLATES.iter().find(|t| t.name == name)
}

/// Substitute `{{key}}` placeholders with the provided variables.
/// Placeholders with no matching variable are stripped from the output.
pub fn render(body: &str, vars: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(body.len());
    let mut rest = body;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let key = after[..end].trim();
                if let Some(value) = vars.get(key) {
                    out.push_str(value);
                }
                rest = &after[end + 2..];
            }
            None => {
                // Unterminated placeholder, keep the remainder verbatim
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
