use chrono::Utc;
use salvo::prelude::*;
use serde_json::json;

use crate::db::LanguageChannelBinding;
use crate::web::web_state;

fn render_error(res: &mut Response, status: StatusCode, message: &str) {
    res.status_code(status);
    res.render(Json(json!({ "error": message })));
}

fn binding_json(binding: &LanguageChannelBinding) -> serde_json::Value {
    json!({
        "id": binding.id,
        "guild_id": binding.guild_id,
        "language_code": binding.language_code,
        "language_name": binding.language_name,
        "channel_id": binding.channel_id,
        "is_active": binding.is_active,
        "created_at": binding.created_at.to_rfc3339(),
    })
}

#[handler]
pub async fn list_bindings(req: &mut Request, res: &mut Response) {
    let Some(guild_id) = req.param::<i64>("guild_id") else {
        render_error(res, StatusCode::BAD_REQUEST, "invalid guild id");
        return;
    };

    match web_state().db_manager.guild_store().get_bindings(guild_id).await {
        Ok(bindings) => {
            let rendered: Vec<_> = bindings.iter().map(binding_json).collect();
            res.render(Json(json!({
                "bindings": rendered,
                "count": rendered.len(),
            })));
        }
        Err(err) => {
            render_error(
                res,
                StatusCode::INTERNAL_SERVER_ERROR,
                &format!("database error: {}", err),
            );
        }
    }
}

#[handler]
pub async fn create_binding(req: &mut Request, res: &mut Response) {
    let Some(guild_id) = req.param::<i64>("guild_id") else {
        render_error(res, StatusCode::BAD_REQUEST, "invalid guild id");
        return;
    };
    let language_code = match req.query::<String>("language_code") {
        Some(v) if !v.is_empty() => v,
        _ => {
            render_error(
                res,
                StatusCode::BAD_REQUEST,
                "missing language_code query parameter",
            );
            return;
        }
    };
    let Some(channel_id) = req.query::<i64>("channel_id") else {
        render_error(
            res,
            StatusCode::BAD_REQUEST,
            "missing channel_id query parameter",
        );
        return;
    };
    let language_name = req
        .query::<String>("language_name")
        .unwrap_or_else(|| language_code.clone());

    let guild_store = web_state().db_manager.guild_store();

    // A language maps to one channel and a channel carries one language.
    match guild_store.get_bindings(guild_id).await {
        Ok(existing) => {
            if existing.iter().any(|b| b.language_code == language_code) {
                render_error(res, StatusCode::CONFLICT, "language is already bound");
                return;
            }
            if existing.iter().any(|b| b.channel_id == channel_id) {
                render_error(res, StatusCode::CONFLICT, "channel is already bound");
                return;
            }
        }
        Err(err) => {
            render_error(
                res,
                StatusCode::INTERNAL_SERVER_ERROR,
                &format!("database error: {}", err),
            );
            return;
        }
    }

    let binding = LanguageChannelBinding {
        id: 0,
        guild_id,
        language_code,
        language_name,
        channel_id,
        is_active: true,
        created_at: Utc::now(),
    };

    match guild_store.create_binding(&binding).await {
        Ok(()) => {
            res.status_code(StatusCode::CREATED);
            res.render(Json(binding_json(&binding)));
        }
        Err(err) => {
            render_error(
                res,
                StatusCode::INTERNAL_SERVER_ERROR,
                &format!("database error: {}", err),
            );
        }
    }
}

#[handler]
pub async fn delete_binding(req: &mut Request, res: &mut Response) {
    let Some(binding_id) = req.param::<i64>("binding_id") else {
        render_error(res, StatusCode::BAD_REQUEST, "invalid binding id");
        return;
    };

    match web_state()
        .db_manager
        .guild_store()
        .delete_binding(binding_id)
        .await
    {
        Ok(()) => {
            res.render(Json(json!({ "deleted": binding_id })));
        }
        Err(err) => {
            render_error(
                res,
                StatusCode::INTERNAL_SERVER_ERROR,
                &format!("database error: {}", err),
            );
        }
    }
}
